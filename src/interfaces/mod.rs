//! 内置接口描述与类型化包装

mod iunknown;
mod stream;

use std::sync::Arc;

use crate::descriptor::InterfaceDescriptor;

pub use iunknown::iunknown;
pub use stream::{SEQUENTIAL_STREAM_OVERRIDES, SeekOrigin, SequentialStream, Stream, sequential_stream, stream};

pub fn builtins() -> Vec<Arc<InterfaceDescriptor>> {
    vec![iunknown(), sequential_stream(), stream()]
}

/// 按名称查找内置接口, 不区分大小写
pub fn builtin(name: &str) -> Option<Arc<InterfaceDescriptor>> {
    builtins()
        .into_iter()
        .find(|descriptor| descriptor.name().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin("istream").unwrap().name(), "IStream");
        assert_eq!(builtin("IUnknown").unwrap().slot_count(), 3);
        assert!(builtin("IDispatch").is_none());
    }
}
