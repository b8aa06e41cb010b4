//! 通用参数编组
//!
//! 1. 检查输入个数和类型
//! 2. 为每个 out / in-out 参数按所指类型分配调用方存储, in-out 先写入初值
//! 3. 组成参数帧调用一次组件方法
//! 4. 失败状态直接报错, 不读取任何输出存储
//! 5. 成功时按声明顺序读出输出

use std::ffi::c_void;
use std::ptr;

use com_abi::{Guid, RawArg};

use super::CallError;
use crate::descriptor::{MethodDescriptor, ParamDirection, ParamType};
use crate::instance::Instance;
use crate::value::{Returned, Value};

/// 一个参数的调用方存储, 能放下任何定长类型
#[repr(C, align(16))]
#[derive(Clone, Copy, Default)]
pub(super) struct Cell([u8; 16]);

impl Cell {
    pub(super) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr()
    }

    fn put<T>(&mut self, value: T) {
        debug_assert!(size_of::<T>() <= size_of::<Cell>());
        unsafe { ptr::write_unaligned(self.0.as_mut_ptr().cast::<T>(), value) }
    }

    fn get<T: Copy>(&self) -> T {
        debug_assert!(size_of::<T>() <= size_of::<Cell>());
        unsafe { ptr::read_unaligned(self.0.as_ptr().cast::<T>()) }
    }

    fn store(&mut self, value: &Value) {
        match *value {
            Value::U8(v) => self.put(v),
            Value::I16(v) => self.put(v),
            Value::U16(v) => self.put(v),
            Value::I32(v) => self.put(v),
            Value::U32(v) => self.put(v),
            Value::I64(v) => self.put(v),
            Value::U64(v) => self.put(v),
            Value::F32(v) => self.put(v),
            Value::F64(v) => self.put(v),
            Value::Bool(v) => self.put(v as i32),
            Value::Guid(v) => self.put(v),
            Value::Pointer(v) => self.put(v),
            // 缓冲区直接传地址, 不经过存储
            Value::Bytes(_) => {}
        }
    }

    pub(super) fn load(&self, ty: &ParamType) -> Value {
        match ty {
            ParamType::U8 => Value::U8(self.get()),
            ParamType::I16 => Value::I16(self.get()),
            ParamType::U16 => Value::U16(self.get()),
            ParamType::I32 => Value::I32(self.get()),
            ParamType::U32 => Value::U32(self.get()),
            ParamType::I64 => Value::I64(self.get()),
            ParamType::U64 => Value::U64(self.get()),
            ParamType::F32 => Value::F32(self.get()),
            ParamType::F64 => Value::F64(self.get()),
            ParamType::Bool => Value::Bool(self.get::<i32>() != 0),
            ParamType::Guid => Value::Guid(self.get::<Guid>()),
            ParamType::RawPtr | ParamType::Ptr(_) => Value::Pointer(self.get::<*mut c_void>()),
        }
    }
}

/// 按值传入的参数
fn by_value(value: &Value) -> RawArg {
    match *value {
        Value::U8(v) => RawArg::word(v as u64),
        Value::I16(v) => RawArg::word(v as i64 as u64),
        Value::U16(v) => RawArg::word(v as u64),
        Value::I32(v) => RawArg::word(v as i64 as u64),
        Value::U32(v) => RawArg::word(v as u64),
        Value::I64(v) => RawArg::word(v as u64),
        Value::U64(v) => RawArg::word(v),
        Value::F32(v) => RawArg::float(v as f64),
        Value::F64(v) => RawArg::float(v),
        Value::Bool(v) => RawArg::word(v as u64),
        Value::Pointer(v) => RawArg::ptr(v),
        // 描述构建时已禁止按值传递 GUID, 缓冲区只匹配指针参数
        Value::Guid(_) | Value::Bytes(_) => RawArg::default(),
    }
}

/// # Safety
/// 同 `Binding::call`
pub(super) unsafe fn invoke(
    instance: &Instance,
    slot: usize,
    method: &MethodDescriptor,
    args: &[Value],
) -> Result<Returned, CallError> {
    let expected = method.inputs().count();
    if args.len() != expected {
        return Err(CallError::ArgumentCount {
            method: method.name().to_string(),
            expected,
            actual: args.len(),
        });
    }

    let params = method.params();
    // 先一次分配好, 之后取到的地址不会失效
    let mut cells = vec![Cell::default(); params.len()];
    let mut frame = Vec::with_capacity(params.len());
    let mut inputs = args.iter();

    for (param, cell) in params.iter().zip(cells.iter_mut()) {
        let value = if param.direction().is_input() {
            let value = inputs.next().ok_or_else(|| CallError::ArgumentCount {
                method: method.name().to_string(),
                expected,
                actual: args.len(),
            })?;
            // 字节缓冲区只能作为纯输入传递, 输出存储只有一个单元
            let bytes_out = matches!(value, Value::Bytes(_)) && param.direction() != ParamDirection::In;
            if !value.matches(param.ty()) || bytes_out {
                return Err(CallError::ArgumentType {
                    method: method.name().to_string(),
                    param: param.name().to_string(),
                    expected: param.ty().clone(),
                    actual: value.type_name(),
                });
            }
            Some(value)
        } else {
            None
        };

        let arg = match (param.direction(), value) {
            (ParamDirection::In, Some(Value::Bytes(bytes))) => RawArg::const_ptr(bytes.as_ptr()),
            (ParamDirection::In, Some(value)) if param.ty().pointee().is_none() => by_value(value),
            (_, value) => {
                if let Some(value) = value {
                    cell.store(value);
                }
                RawArg::ptr(cell.as_mut_ptr())
            }
        };
        frame.push(arg);
    }

    let hresult = unsafe { instance.invoke_raw(slot, &frame) }?;
    if hresult.is_err() {
        tracing::debug!(method = method.name(), %hresult, "组件返回失败");
        return Err(CallError::Failed {
            method: method.name().to_string(),
            hresult,
        });
    }

    let outputs = params
        .iter()
        .zip(&cells)
        .filter(|(param, _)| param.direction().is_output())
        .map(|(param, cell)| cell.load(param.storage_type()))
        .collect();
    Ok(Returned::from_outputs(outputs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_store_load() {
        let mut cell = Cell::default();
        cell.store(&Value::I16(-2));
        assert_eq!(cell.load(&ParamType::I16), Value::I16(-2));

        let id = Guid::from_u128(0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF);
        cell.store(&Value::Guid(id));
        assert_eq!(cell.load(&ParamType::Guid), Value::Guid(id));

        cell.store(&Value::Bool(true));
        assert_eq!(cell.get::<i32>(), 1);
        assert_eq!(cell.load(&ParamType::Bool), Value::Bool(true));
    }

    #[test]
    fn test_by_value_sign_extends() {
        let arg = by_value(&Value::I32(-1));
        assert_eq!(unsafe { arg.as_word() }, u64::MAX);
        let arg = by_value(&Value::F32(1.5));
        assert_eq!(unsafe { arg.as_float() }, 1.5);
    }
}
