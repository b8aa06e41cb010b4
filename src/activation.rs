//! 组件激活
//!
//! 按类标识和上下文创建组件, 并以调用方要求的接口返回。
//! 类由配置文件登记, 组件类型通过 `ServerFactory` 映射到构造函数。

use std::ptr::NonNull;
use std::sync::Arc;

use com_abi::{CLASS_E_CLASSNOTAVAILABLE, E_FAIL, Guid, GuidError, HResult, RawObject, REGDB_E_CLASSNOTREG};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::binding::CallError;
use crate::const_values::ClassConfig;
use crate::descriptor::InterfaceDescriptor;
use crate::instance::Instance;
use crate::interfaces::iunknown;

/// 激活上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationContext {
    /// 进程内
    #[default]
    Inproc,
    /// 本机另一个进程
    Local,
    Remote,
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("类 {0} 未注册")]
    NotRegistered(Guid),
    #[error("类 {clsid} 注册在 {registered:?} 上下文, 不能在 {requested:?} 上下文激活")]
    ContextUnavailable {
        clsid: Guid,
        registered: ActivationContext,
        requested: ActivationContext,
    },
    #[error("类 {0} 重复注册")]
    Duplicate(Guid),
    #[error("未知组件类型: {0}")]
    UnknownServerType(String),
    #[error("类 {name} 的标识格式错误: {source}")]
    Identity { name: String, source: GuidError },
    #[error("激活失败: {0}")]
    Call(#[from] CallError),
}

impl ActivationError {
    /// 对应的组件状态码
    pub fn hresult(&self) -> HResult {
        match self {
            ActivationError::NotRegistered(_) => REGDB_E_CLASSNOTREG,
            ActivationError::ContextUnavailable { .. } => CLASS_E_CLASSNOTAVAILABLE,
            ActivationError::Call(err) => err.hresult().unwrap_or(E_FAIL),
            _ => E_FAIL,
        }
    }
}

/// 创建组件, 返回持有一个引用的对象
pub trait Activator {
    fn activate(
        &self,
        clsid: &Guid,
        interface: &Arc<InterfaceDescriptor>,
        context: ActivationContext,
    ) -> Result<Instance, ActivationError>;
}

/// 组件构造函数, 参数为实例名称
pub type ServerConstructor = fn(&str) -> NonNull<RawObject>;

/// 组件工厂
pub struct ServerFactory;

impl ServerFactory {
    /// 根据组件类型取构造函数
    pub fn constructor(server_type: &str) -> Result<ServerConstructor, ActivationError> {
        match server_type {
            "memstream" => Ok(create_memory_stream as ServerConstructor),
            _ => Err(ActivationError::UnknownServerType(server_type.to_string())),
        }
    }
}

fn create_memory_stream(name: &str) -> NonNull<RawObject> {
    memstream::create_named(name, Vec::new())
}

struct ClassEntry {
    name: String,
    context: ActivationContext,
    constructor: ServerConstructor,
}

/// 已登记的类
#[derive(Default)]
pub struct ClassRegistry {
    classes: FxHashMap<Guid, ClassEntry>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据配置登记全部启用的类
    pub fn from_config(configs: &[ClassConfig]) -> Result<Self, ActivationError> {
        let mut registry = Self::new();
        for config in configs {
            if !config.enabled {
                tracing::info!("跳过禁用的类: {}", config.name);
                continue;
            }
            let clsid = Guid::parse(&config.clsid).map_err(|source| ActivationError::Identity {
                name: config.name.clone(),
                source,
            })?;
            tracing::info!(
                "登记类: {} (类型: {}, 标识: {}, 上下文: {:?})",
                config.name,
                config.server_type,
                clsid,
                config.context
            );
            let constructor = ServerFactory::constructor(&config.server_type)?;
            registry.register(&config.name, clsid, config.context, constructor)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: &str,
        clsid: Guid,
        context: ActivationContext,
        constructor: ServerConstructor,
    ) -> Result<(), ActivationError> {
        if self.classes.contains_key(&clsid) {
            return Err(ActivationError::Duplicate(clsid));
        }
        self.classes.insert(
            clsid,
            ClassEntry {
                name: name.to_string(),
                context,
                constructor,
            },
        );
        Ok(())
    }

    /// 按名称查找类标识
    pub fn find(&self, name: &str) -> Option<Guid> {
        self.classes
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(clsid, _)| *clsid)
    }

    /// (标识, 名称, 上下文), 按名称排序
    pub fn classes(&self) -> Vec<(Guid, &str, ActivationContext)> {
        let mut classes: Vec<_> = self
            .classes
            .iter()
            .map(|(clsid, entry)| (*clsid, entry.name.as_str(), entry.context))
            .collect();
        classes.sort_by(|a, b| a.1.cmp(b.1));
        classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Activator for ClassRegistry {
    fn activate(
        &self,
        clsid: &Guid,
        interface: &Arc<InterfaceDescriptor>,
        context: ActivationContext,
    ) -> Result<Instance, ActivationError> {
        let entry = self.classes.get(clsid).ok_or(ActivationError::NotRegistered(*clsid))?;
        if entry.context != context {
            return Err(ActivationError::ContextUnavailable {
                clsid: *clsid,
                registered: entry.context,
                requested: context,
            });
        }

        let raw = (entry.constructor)(&entry.name);
        // 构造函数返回的对象至少实现 IUnknown
        let unknown = unsafe { Instance::from_raw(raw, iunknown()) }?;
        let instance = unknown.query_interface(interface)?;
        tracing::debug!(class = %entry.name, interface = %interface.name(), "组件已激活");
        Ok(instance)
    }
}
