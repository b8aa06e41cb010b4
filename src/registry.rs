//! 绑定缓存
//!
//! 每个接口标识只生成一次绑定, 之后的请求直接返回缓存。
//! 标识相同的独立描述共享第一次生成的绑定。

use std::sync::{Arc, Mutex, PoisonError};

use com_abi::Guid;
use rustc_hash::FxHashMap;

use crate::binding::{BindError, BindingSet, OverrideTable};
use crate::descriptor::InterfaceDescriptor;

pub struct BindingRegistry {
    overrides: OverrideTable,
    cache: Mutex<FxHashMap<Guid, Arc<BindingSet>>>,
}

impl BindingRegistry {
    pub fn new(overrides: OverrideTable) -> Self {
        Self {
            overrides,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// 使用内置覆盖
    pub fn standard() -> Self {
        Self::new(OverrideTable::standard())
    }

    pub fn overrides(&self) -> &OverrideTable {
        &self.overrides
    }

    pub fn bindings_for(&self, descriptor: &Arc<InterfaceDescriptor>) -> Result<Arc<BindingSet>, BindError> {
        let iid = descriptor.iid();
        // 生成过程不会 panic 出半成品, 中毒的锁可以继续使用
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = cache.get(&iid) {
            tracing::trace!(interface = %descriptor.name(), "绑定缓存命中");
            return Ok(set.clone());
        }
        let set = Arc::new(BindingSet::generate(descriptor, &self.overrides)?);
        cache.insert(iid, set.clone());
        Ok(set)
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InterfaceBuilder, MethodDescriptor, ParamType};
    use crate::interfaces::{sequential_stream, stream};

    #[test]
    fn test_generated_once_per_identity() {
        let registry = BindingRegistry::standard();
        let first = registry.bindings_for(&stream()).unwrap();
        let second = registry.bindings_for(&stream()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.cached(), 1);

        registry.bindings_for(&sequential_stream()).unwrap();
        assert_eq!(registry.cached(), 2);
    }

    #[test]
    fn test_equal_identity_shares_first_set() {
        let registry = BindingRegistry::standard();
        let original = registry.bindings_for(&stream()).unwrap();

        let lookalike = InterfaceBuilder::with_guid("IStreamCopy", stream().iid())
            .method(MethodDescriptor::new("Only").input("x", ParamType::U32))
            .build()
            .unwrap();
        let shared = registry.bindings_for(&lookalike).unwrap();
        assert!(Arc::ptr_eq(&original, &shared));
        assert!(shared.get("Only").is_none());
    }

    #[test]
    fn test_failed_generation_not_cached() {
        let registry = BindingRegistry::new(OverrideTable::new());
        assert!(registry.bindings_for(&sequential_stream()).is_err());
        assert_eq!(registry.cached(), 0);
    }

    #[test]
    fn test_shared_across_threads() {
        let registry = Arc::new(BindingRegistry::standard());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.bindings_for(&stream()).unwrap())
            })
            .collect();
        let sets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
