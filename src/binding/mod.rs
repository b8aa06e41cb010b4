//! 调用绑定
//!
//! 每个接口描述生成一组绑定: 按名称查找, 调用时只传 `in` 和 `in-out` 参数,
//! 得到按声明顺序排列的输出。通用绑定按参数类型为每个输出分配存储;
//! 通用方式处理不了的方法 (例如输出缓冲区大小由参数决定) 通过覆盖表替换。

mod marshal;
pub mod overrides;

use std::fmt;
use std::sync::Arc;

use com_abi::{Guid, HResult};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::descriptor::{InterfaceDescriptor, MethodDescriptor, ParamType};
use crate::instance::Instance;
use crate::value::{Returned, Value};

pub use overrides::{MethodOverride, OverrideBuilder, OverrideTable, sized_read};

/// 覆盖提供的调用实现
pub type CustomCall = dyn Fn(&Instance, &[Value]) -> Result<Returned, CallError> + Send + Sync;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("调用 {method} 失败: {hresult}")]
    Failed { method: String, hresult: HResult },
    #[error("{method} 需要 {expected} 个参数, 实际传入 {actual} 个")]
    ArgumentCount { method: String, expected: usize, actual: usize },
    #[error("{method} 的参数 {param} 需要 {expected}, 实际传入 {actual}")]
    ArgumentType {
        method: String,
        param: String,
        expected: ParamType,
        actual: &'static str,
    },
    #[error("{method} 的参数 {param} 过大: {len}")]
    TooLarge { method: String, param: String, len: u64 },
    #[error("接口 {interface} 没有可调用的方法 {method}")]
    UnknownMethod { interface: String, method: String },
    #[error("绑定属于接口 {expected}, 实例的接口是 {actual}")]
    WrongInterface { expected: Guid, actual: Guid },
    #[error("方法表没有槽位 {slot} (共 {len} 个)")]
    MissingSlot { slot: usize, len: usize },
    #[error("对象没有方法表")]
    NullTable,
    #[error("接口 {interface} 需要 {expected} 个槽位, 方法表只有 {actual} 个")]
    Layout { interface: String, expected: usize, actual: usize },
    #[error("{method} 报告读取 {reported} 字节, 超过请求的 {requested} 字节")]
    Overrun { method: String, requested: u64, reported: u64 },
    #[error("{method} 的返回值与声明不符")]
    UnexpectedResult { method: String },
    #[error(transparent)]
    Bind(#[from] BindError),
}

impl CallError {
    /// 组件返回的失败状态码
    pub fn hresult(&self) -> Option<HResult> {
        match self {
            CallError::Failed { hresult, .. } => Some(*hresult),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("{interface}::{method} 的输出缓冲区 {buffer} 大小由参数 {count} 决定, 必须注册覆盖")]
    SizedOutput {
        interface: String,
        method: String,
        buffer: String,
        count: String,
    },
    #[error("覆盖不适用于 {method}: {reason}")]
    OverrideShape { method: String, reason: String },
}

#[derive(Clone)]
enum Strategy {
    Generated,
    Custom(Arc<CustomCall>),
}

/// 一个可调用的方法
#[derive(Clone)]
pub struct Binding {
    interface: Guid,
    slot: usize,
    method: MethodDescriptor,
    strategy: Strategy,
}

impl Binding {
    pub fn name(&self) -> &str {
        self.method.name()
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn is_overridden(&self) -> bool {
        matches!(self.strategy, Strategy::Custom(_))
    }

    /// 在 `instance` 上调用, 每次调用只触发一次组件方法
    ///
    /// # Safety
    /// 参数值必须满足组件方法的约定: 原始指针有效, 缓冲区不短于对应的大小参数
    pub unsafe fn call(&self, instance: &Instance, args: &[Value]) -> Result<Returned, CallError> {
        if !instance.descriptor().is_a(&self.interface) {
            return Err(CallError::WrongInterface {
                expected: self.interface,
                actual: instance.iid(),
            });
        }
        tracing::trace!(method = self.method.name(), slot = self.slot, "调用");
        match &self.strategy {
            Strategy::Generated => unsafe { marshal::invoke(instance, self.slot, &self.method, args) },
            Strategy::Custom(call) => call(instance, args),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.method.name())
            .field("slot", &self.slot)
            .field("overridden", &self.is_overridden())
            .finish()
    }
}

/// 一个接口的全部绑定
#[derive(Debug)]
pub struct BindingSet {
    interface: Arc<InterfaceDescriptor>,
    bindings: FxHashMap<String, Binding>,
    order: Vec<String>,
}

impl BindingSet {
    /// 为接口的每个非受限方法生成绑定, 覆盖表中登记的方法使用覆盖
    pub fn generate(descriptor: &Arc<InterfaceDescriptor>, overrides: &OverrideTable) -> Result<Self, BindError> {
        let mut bindings = FxHashMap::default();
        let mut order = Vec::new();

        for entry in descriptor.methods() {
            let method = entry.method;
            if method.is_restricted() {
                tracing::debug!(interface = %descriptor.name(), method = method.name(), "跳过受限方法");
                continue;
            }

            let strategy = match overrides.lookup(&entry.owner.iid(), method.name()) {
                Some(build) => {
                    tracing::debug!(
                        interface = %entry.owner.name(),
                        method = method.name(),
                        slot = entry.slot,
                        "使用覆盖"
                    );
                    Strategy::Custom(build(entry.slot, method)?)
                }
                None => {
                    if let Some(shape) = method.sized_output() {
                        let params = method.params();
                        return Err(BindError::SizedOutput {
                            interface: entry.owner.name().to_string(),
                            method: method.name().to_string(),
                            buffer: params[shape.buffer].name().to_string(),
                            count: params[shape.count].name().to_string(),
                        });
                    }
                    Strategy::Generated
                }
            };

            let name = method.name().to_string();
            let binding = Binding {
                interface: entry.owner.iid(),
                slot: entry.slot,
                method: method.clone(),
                strategy,
            };
            // 派生接口重新声明的同名方法替换基接口的绑定
            if bindings.insert(name.clone(), binding).is_none() {
                order.push(name);
            }
        }

        tracing::debug!(interface = %descriptor.name(), bindings = order.len(), "绑定已生成");
        Ok(Self {
            interface: descriptor.clone(),
            bindings,
            order,
        })
    }

    pub fn interface(&self) -> &Arc<InterfaceDescriptor> {
        &self.interface
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// 按方法表顺序
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.order.iter().filter_map(|name| self.bindings.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按名称调用
    ///
    /// # Safety
    /// 同 [`Binding::call`]
    pub unsafe fn call(&self, instance: &Instance, name: &str, args: &[Value]) -> Result<Returned, CallError> {
        let binding = self.get(name).ok_or_else(|| CallError::UnknownMethod {
            interface: self.interface.name().to_string(),
            method: name.to_string(),
        })?;
        unsafe { binding.call(instance, args) }
    }
}
