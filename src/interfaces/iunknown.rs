use std::sync::{Arc, LazyLock};

use com_abi::iids::IID_IUNKNOWN;

use crate::descriptor::{IdlFlags, InterfaceBuilder, InterfaceDescriptor, MethodDescriptor, ParamType};

static IUNKNOWN: LazyLock<Arc<InterfaceDescriptor>> = LazyLock::new(|| {
    InterfaceBuilder::with_guid("IUnknown", IID_IUNKNOWN)
        .method(
            MethodDescriptor::new("QueryInterface")
                .with_flags(IdlFlags::RESTRICTED)
                .input("riid", ParamType::ptr(ParamType::Guid))
                .output("ppvObject", ParamType::ptr(ParamType::RawPtr)),
        )
        .method(MethodDescriptor::new("AddRef").with_flags(IdlFlags::RESTRICTED))
        .method(MethodDescriptor::new("Release").with_flags(IdlFlags::RESTRICTED))
        .build()
        .expect("IUnknown 描述是静态定义的")
});

/// 所有接口的根, 三个方法都是受限的
pub fn iunknown() -> Arc<InterfaceDescriptor> {
    IUNKNOWN.clone()
}
