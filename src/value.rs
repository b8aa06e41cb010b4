//! 动态调用使用的参数和返回值

use std::ffi::c_void;

use com_abi::Guid;

use crate::descriptor::ParamType;

/// 一个参数或输出值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Guid(Guid),
    Pointer(*mut c_void),
    /// 字节缓冲区, 作为 `*mut u8` 参数传入或由覆盖返回
    Bytes(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Bool(_) => "bool",
            Value::Guid(_) => "GUID",
            Value::Pointer(_) => "pointer",
            Value::Bytes(_) => "bytes",
        }
    }

    /// 能否作为 `ty` 类型的参数传入
    ///
    /// 指针参数接受所指类型的值 (由调用方存储提供地址);
    /// 字节指针还接受整段缓冲区。
    pub fn matches(&self, ty: &ParamType) -> bool {
        match (self, ty) {
            (Value::U8(_), ParamType::U8)
            | (Value::I16(_), ParamType::I16)
            | (Value::U16(_), ParamType::U16)
            | (Value::I32(_), ParamType::I32)
            | (Value::U32(_), ParamType::U32)
            | (Value::I64(_), ParamType::I64)
            | (Value::U64(_), ParamType::U64)
            | (Value::F32(_), ParamType::F32)
            | (Value::F64(_), ParamType::F64)
            | (Value::Bool(_), ParamType::Bool)
            | (Value::Guid(_), ParamType::Guid)
            | (Value::Pointer(_), ParamType::RawPtr) => true,
            (Value::Bytes(_), ParamType::Ptr(inner)) => **inner == ParamType::U8,
            (Value::Pointer(_), ParamType::Ptr(_)) => false,
            (value, ParamType::Ptr(inner)) => value.matches(inner),
            _ => false,
        }
    }

    /// 无符号整数值, 用于大小参数
    pub fn as_unsigned(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    /// 按 `ty` 构造无符号整数值, 超出范围时返回 None
    pub fn unsigned(ty: &ParamType, value: u64) -> Option<Value> {
        match ty {
            ParamType::U8 => u8::try_from(value).ok().map(Value::U8),
            ParamType::U16 => u16::try_from(value).ok().map(Value::U16),
            ParamType::U32 => u32::try_from(value).ok().map(Value::U32),
            ParamType::U64 => Some(Value::U64(value)),
            _ => None,
        }
    }
}

macro_rules! value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = Value;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    U8 => u8,
    I16 => i16,
    U16 => u16,
    I32 => i32,
    U32 => u32,
    I64 => i64,
    U64 => u64,
    F32 => f32,
    F64 => f64,
    Bool => bool,
    Guid => Guid,
    Pointer => *mut c_void,
    Bytes => Vec<u8>,
}

/// 一次调用的结果: 没有输出为空, 一个输出直接返回, 多个输出按声明顺序组成元组
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Returned {
    #[default]
    Empty,
    Single(Value),
    Tuple(Vec<Value>),
}

impl Returned {
    pub fn from_outputs(mut outputs: Vec<Value>) -> Self {
        match outputs.len() {
            0 => Returned::Empty,
            1 => outputs.pop().map_or(Returned::Empty, Returned::Single),
            _ => Returned::Tuple(outputs),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Returned::Empty => 0,
            Returned::Single(_) => 1,
            Returned::Tuple(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Returned::Empty)
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Returned::Empty => Vec::new(),
            Returned::Single(value) => vec![value],
            Returned::Tuple(values) => values,
        }
    }

    pub fn single(self) -> Option<Value> {
        match self {
            Returned::Single(value) => Some(value),
            _ => None,
        }
    }

    pub fn pair(self) -> Option<(Value, Value)> {
        match self {
            Returned::Tuple(values) => {
                let [first, second]: [Value; 2] = values.try_into().ok()?;
                Some((first, second))
            }
            _ => None,
        }
    }
}
