//! 接口描述
//!
//! 一个接口由 128 位标识、IDL 标志和有序的方法列表组成。
//! 方法的声明顺序就是它在二进制方法表中的槽位 (继承来的方法在前)。
//! 描述通过 `InterfaceBuilder` 构建, 构建完成后冻结在 `Arc` 中, 不再修改。

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;
use com_abi::{Guid, GuidError};
use rustc_hash::FxHashSet;
use thiserror::Error;

bitflags! {
    /// 接口或方法上的 IDL 标志, 只作为生成绑定时的参考
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IdlFlags: u32 {
        /// 不对调用方公开 (IUnknown 的生命周期方法)
        const RESTRICTED = 1 << 0;
        const HIDDEN = 1 << 1;
        /// 只能在进程内调用
        const LOCAL = 1 << 2;
        const OLEAUTOMATION = 1 << 3;
        const DUAL = 1 << 4;
        const NONEXTENSIBLE = 1 << 5;
    }
}

/// 描述构建错误, 只会在 `InterfaceBuilder::build` 时出现
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("接口 {interface} 的标识格式错误: {source}")]
    Identity { interface: String, source: GuidError },
    #[error("接口 {interface} 重复声明了方法 {method}")]
    DuplicateMethod { interface: String, method: String },
    #[error("方法 {method} 重复声明了参数 {param}")]
    DuplicateParam { method: String, param: String },
    #[error("方法 {method} 的参数 {param} 是输出参数, 必须声明为指针")]
    OutputNotPointer { method: String, param: String },
    #[error("方法 {method} 的参数 {param} 使用了不支持的类型 {ty}")]
    UnsupportedType { method: String, param: String, ty: ParamType },
    #[error("方法 {method} 的 size_is({buffer}, {count}) 无效: 需要输出字节指针和输入无符号整数")]
    SizeIs { method: String, buffer: String, count: String },
}

/// 参数方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

impl ParamDirection {
    /// 调用方需要提供值
    pub fn is_input(self) -> bool {
        matches!(self, ParamDirection::In | ParamDirection::InOut)
    }

    /// 被调用方会写入值
    pub fn is_output(self) -> bool {
        matches!(self, ParamDirection::Out | ParamDirection::InOut)
    }
}

impl fmt::Display for ParamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamDirection::In => "in",
            ParamDirection::Out => "out",
            ParamDirection::InOut => "in, out",
        })
    }
}

/// 参数类型: 定长基本类型或指针
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// 4 字节 BOOL
    Bool,
    /// 只能通过指针传递
    Guid,
    /// 不透明指针 (例如另一个接口对象)
    RawPtr,
    Ptr(Box<ParamType>),
}

impl ParamType {
    pub fn ptr(inner: ParamType) -> Self {
        ParamType::Ptr(Box::new(inner))
    }

    pub fn pointee(&self) -> Option<&ParamType> {
        match self {
            ParamType::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, ParamType::U8 | ParamType::U16 | ParamType::U32 | ParamType::U64)
    }

    /// 字节指针, 通常表示一段缓冲区
    pub fn is_byte_buffer(&self) -> bool {
        self.pointee() == Some(&ParamType::U8)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::U8 => f.write_str("u8"),
            ParamType::I16 => f.write_str("i16"),
            ParamType::U16 => f.write_str("u16"),
            ParamType::I32 => f.write_str("i32"),
            ParamType::U32 => f.write_str("u32"),
            ParamType::I64 => f.write_str("i64"),
            ParamType::U64 => f.write_str("u64"),
            ParamType::F32 => f.write_str("f32"),
            ParamType::F64 => f.write_str("f64"),
            ParamType::Bool => f.write_str("BOOL"),
            ParamType::Guid => f.write_str("GUID"),
            ParamType::RawPtr => f.write_str("*mut c_void"),
            ParamType::Ptr(inner) => write!(f, "*mut {}", inner),
        }
    }
}

/// 一个参数: (方向, 类型, 名称)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    direction: ParamDirection,
    ty: ParamType,
    name: String,
}

impl ParamDescriptor {
    pub fn new(direction: ParamDirection, ty: ParamType, name: impl Into<String>) -> Self {
        Self {
            direction,
            ty,
            name: name.into(),
        }
    }

    pub fn direction(&self) -> ParamDirection {
        self.direction
    }

    pub fn ty(&self) -> &ParamType {
        &self.ty
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 输出参数实际存储的类型 (指针所指的类型)
    pub fn storage_type(&self) -> &ParamType {
        self.ty.pointee().unwrap_or(&self.ty)
    }
}

/// 输出缓冲区大小由另一个输入参数决定的方法形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedOutput {
    /// 缓冲区参数的位置
    pub buffer: usize,
    /// 大小参数的位置
    pub count: usize,
}

/// 方法描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    name: String,
    flags: IdlFlags,
    params: Vec<ParamDescriptor>,
    /// (缓冲区参数, 大小参数)
    size_is: Option<(String, String)>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: IdlFlags::empty(),
            params: Vec::new(),
            size_is: None,
        }
    }

    pub fn with_flags(mut self, flags: IdlFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn param(mut self, direction: ParamDirection, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamDescriptor::new(direction, ty, name));
        self
    }

    pub fn input(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.param(ParamDirection::In, name, ty)
    }

    pub fn output(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.param(ParamDirection::Out, name, ty)
    }

    pub fn in_out(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.param(ParamDirection::InOut, name, ty)
    }

    /// 声明输出缓冲区 `buffer` 的字节数由输入参数 `count` 给出
    ///
    /// 没有这个声明时, 输出字节指针按单个字节处理。
    pub fn size_is(mut self, buffer: impl Into<String>, count: impl Into<String>) -> Self {
        self.size_is = Some((buffer.into(), count.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> IdlFlags {
        self.flags
    }

    pub fn is_restricted(&self) -> bool {
        self.flags.contains(IdlFlags::RESTRICTED)
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.params.iter().filter(|p| p.direction.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.params.iter().filter(|p| p.direction.is_output())
    }

    /// 通过 `size_is` 声明的 "输出缓冲区大小由输入参数给出" 的形状
    ///
    /// 通用绑定只会按类型为字节指针分配一个字节, 这种方法必须通过覆盖调用。
    pub fn sized_output(&self) -> Option<SizedOutput> {
        let (buffer, count) = self.size_is.as_ref()?;
        let buffer = self.params.iter().position(|p| p.name == *buffer)?;
        let count = self.params.iter().position(|p| p.name == *count)?;
        Some(SizedOutput { buffer, count })
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if let Some((buffer, count)) = &self.size_is {
            let valid = self.sized_output().is_some_and(|shape| {
                let (buffer, count) = (&self.params[shape.buffer], &self.params[shape.count]);
                buffer.direction.is_output()
                    && buffer.ty.is_byte_buffer()
                    && count.direction == ParamDirection::In
                    && count.ty.is_unsigned_integer()
            });
            if !valid {
                return Err(DefinitionError::SizeIs {
                    method: self.name.clone(),
                    buffer: buffer.clone(),
                    count: count.clone(),
                });
            }
        }

        let mut seen = FxHashSet::default();
        for param in &self.params {
            if !seen.insert(param.name.as_str()) {
                return Err(DefinitionError::DuplicateParam {
                    method: self.name.clone(),
                    param: param.name.clone(),
                });
            }

            let unsupported = || DefinitionError::UnsupportedType {
                method: self.name.clone(),
                param: param.name.clone(),
                ty: param.ty.clone(),
            };
            match (&param.ty, param.direction) {
                (ParamType::Ptr(inner), _) if matches!(**inner, ParamType::Ptr(_)) => return Err(unsupported()),
                (ParamType::Ptr(_), _) => {}
                (_, ParamDirection::Out | ParamDirection::InOut) => {
                    return Err(DefinitionError::OutputNotPointer {
                        method: self.name.clone(),
                        param: param.name.clone(),
                    });
                }
                (ParamType::Guid, ParamDirection::In) => return Err(unsupported()),
                _ => {}
            }
        }
        Ok(())
    }
}

/// 方法在完整方法表中的位置
#[derive(Debug, Clone, Copy)]
pub struct MethodEntry<'a> {
    pub slot: usize,
    /// 声明该方法的接口
    pub owner: &'a InterfaceDescriptor,
    pub method: &'a MethodDescriptor,
}

/// 冻结的接口描述
///
/// 相等性只看标识: 独立定义但标识相同的两个描述视为同一个接口。
#[derive(Debug)]
pub struct InterfaceDescriptor {
    name: String,
    iid: Guid,
    flags: IdlFlags,
    base: Option<Arc<InterfaceDescriptor>>,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iid(&self) -> Guid {
        self.iid
    }

    pub fn flags(&self) -> IdlFlags {
        self.flags
    }

    pub fn base(&self) -> Option<&Arc<InterfaceDescriptor>> {
        self.base.as_ref()
    }

    /// 本接口自己声明的方法 (不含继承)
    pub fn own_methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// 本接口第一个方法的槽位
    pub fn first_slot(&self) -> usize {
        self.base.as_ref().map_or(0, |base| base.slot_count())
    }

    pub fn slot_count(&self) -> usize {
        self.first_slot() + self.methods.len()
    }

    /// 继承链, 从最基础的接口开始
    pub fn lineage(&self) -> Vec<&InterfaceDescriptor> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(base) = current.base.as_deref() {
            chain.push(base);
            current = base;
        }
        chain.reverse();
        chain
    }

    /// 按槽位顺序列出全部方法, 继承来的在前
    pub fn methods(&self) -> impl Iterator<Item = MethodEntry<'_>> {
        self.lineage().into_iter().flat_map(|owner| {
            let first = owner.first_slot();
            owner
                .methods
                .iter()
                .enumerate()
                .map(move |(index, method)| MethodEntry {
                    slot: first + index,
                    owner,
                    method,
                })
        })
    }

    /// 按名称查找, 派生接口的声明优先
    pub fn method(&self, name: &str) -> Option<MethodEntry<'_>> {
        let mut current = Some(self);
        while let Some(owner) = current {
            if let Some(index) = owner.methods.iter().position(|m| m.name == name) {
                return Some(MethodEntry {
                    slot: owner.first_slot() + index,
                    owner,
                    method: &owner.methods[index],
                });
            }
            current = owner.base.as_deref();
        }
        None
    }

    /// 声明 `slot` 处方法的接口
    pub fn declaring_iid(&self, slot: usize) -> Option<Guid> {
        self.methods()
            .find(|entry| entry.slot == slot)
            .map(|entry| entry.owner.iid())
    }

    /// 本接口或其基接口的标识是否为 `iid`
    pub fn is_a(&self, iid: &Guid) -> bool {
        let mut current = Some(self);
        while let Some(iface) = current {
            if iface.iid == *iid {
                return true;
            }
            current = iface.base.as_deref();
        }
        false
    }
}

impl PartialEq for InterfaceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.iid == other.iid
    }
}

impl Eq for InterfaceDescriptor {}

impl Hash for InterfaceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.iid.hash(state);
    }
}

/// 接口描述构建器
pub struct InterfaceBuilder {
    name: String,
    iid: Result<Guid, GuidError>,
    flags: IdlFlags,
    base: Option<Arc<InterfaceDescriptor>>,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceBuilder {
    /// 使用规范文本形式的标识, 格式错误在 `build` 时报告
    pub fn new(name: impl Into<String>, iid: &str) -> Self {
        Self::from_result(name.into(), Guid::parse(iid))
    }

    pub fn with_guid(name: impl Into<String>, iid: Guid) -> Self {
        Self::from_result(name.into(), Ok(iid))
    }

    /// 使用内存布局形式的标识, 必须正好 16 字节
    pub fn from_bytes(name: impl Into<String>, iid: &[u8]) -> Self {
        Self::from_result(name.into(), Guid::from_bytes(iid))
    }

    fn from_result(name: String, iid: Result<Guid, GuidError>) -> Self {
        Self {
            name,
            iid,
            flags: IdlFlags::empty(),
            base: None,
            methods: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: IdlFlags) -> Self {
        self.flags = flags;
        self
    }

    /// 继承 `base` 的全部槽位
    pub fn extends(mut self, base: &Arc<InterfaceDescriptor>) -> Self {
        self.base = Some(base.clone());
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build(self) -> Result<Arc<InterfaceDescriptor>, DefinitionError> {
        let iid = self.iid.map_err(|source| DefinitionError::Identity {
            interface: self.name.clone(),
            source,
        })?;

        let mut seen = FxHashSet::default();
        for method in &self.methods {
            if !seen.insert(method.name()) {
                return Err(DefinitionError::DuplicateMethod {
                    interface: self.name.clone(),
                    method: method.name().to_string(),
                });
            }
            method.validate()?;
        }

        let descriptor = InterfaceDescriptor {
            name: self.name,
            iid,
            flags: self.flags,
            base: self.base,
            methods: self.methods,
        };
        tracing::debug!(
            interface = %descriptor.name,
            iid = %descriptor.iid,
            slots = descriptor.slot_count(),
            "接口描述已冻结"
        );
        Ok(Arc::new(descriptor))
    }
}
