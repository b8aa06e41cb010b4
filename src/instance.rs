//! 组件实例: 持有一个引用的接口指针

use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use com_abi::{E_POINTER, Guid, HResult, RawArg, RawObject};

use crate::binding::CallError;
use crate::descriptor::InterfaceDescriptor;

const SLOT_QUERY_INTERFACE: usize = 0;
const SLOT_ADD_REF: usize = 1;
const SLOT_RELEASE: usize = 2;
/// IUnknown 占用的槽位数
const UNKNOWN_SLOTS: usize = 3;

/// 以某个接口描述看待的组件实例
///
/// 克隆会 AddRef, 丢弃会 Release, 生命周期完全由所有权决定。
pub struct Instance {
    raw: NonNull<RawObject>,
    descriptor: Arc<InterfaceDescriptor>,
}

// 组件自身保证线程安全 (ComServer: Send + Sync)
unsafe impl Send for Instance {}
unsafe impl Sync for Instance {}

impl Instance {
    /// 接管 `raw` 上已有的一个引用
    ///
    /// 方法表短于描述要求时会释放该引用并返回错误。
    ///
    /// # Safety
    /// `raw` 必须是存活的对象, 且其方法表按 `descriptor` 的槽位顺序排列
    pub unsafe fn from_raw(raw: NonNull<RawObject>, descriptor: Arc<InterfaceDescriptor>) -> Result<Self, CallError> {
        let table = unsafe { RawObject::vtable(raw.as_ptr()) }.ok_or(CallError::NullTable)?;
        let expected = descriptor.slot_count().max(UNKNOWN_SLOTS);
        if table.len() < expected {
            if let Some(release) = table.slot(SLOT_RELEASE) {
                unsafe { release(raw.as_ptr(), ptr::null(), 0) };
            }
            return Err(CallError::Layout {
                interface: descriptor.name().to_string(),
                expected,
                actual: table.len(),
            });
        }
        Ok(Self { raw, descriptor })
    }

    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.descriptor
    }

    pub fn iid(&self) -> Guid {
        self.descriptor.iid()
    }

    pub fn as_raw(&self) -> *mut RawObject {
        self.raw.as_ptr()
    }

    /// 直接调用槽位, 返回原始状态码
    ///
    /// # Safety
    /// `args` 必须符合该槽位的参数帧约定, 其中的指针在调用期间有效
    pub unsafe fn invoke_raw(&self, slot: usize, args: &[RawArg]) -> Result<HResult, CallError> {
        let table = unsafe { RawObject::vtable(self.raw.as_ptr()) }.ok_or(CallError::NullTable)?;
        let method = table.slot(slot).ok_or(CallError::MissingSlot {
            slot,
            len: table.len(),
        })?;
        Ok(unsafe { method(self.raw.as_ptr(), args.as_ptr(), args.len()) })
    }

    /// AddRef 后返回持有新引用的副本, AddRef 调用不成时不改变引用计数
    pub fn try_clone(&self) -> Result<Instance, CallError> {
        // AddRef 返回的是新的引用计数, 不是状态码
        unsafe { self.invoke_raw(SLOT_ADD_REF, &[]) }?;
        Ok(Self {
            raw: self.raw,
            descriptor: self.descriptor.clone(),
        })
    }

    /// 向组件请求另一个接口
    pub fn query_interface(&self, target: &Arc<InterfaceDescriptor>) -> Result<Instance, CallError> {
        let iid = target.iid();
        let mut out: *mut RawObject = ptr::null_mut();
        let frame = [RawArg::const_ptr(&iid), RawArg::ptr(&mut out)];
        let hresult = unsafe { self.invoke_raw(SLOT_QUERY_INTERFACE, &frame) }?;
        if hresult.is_err() {
            return Err(CallError::Failed {
                method: "QueryInterface".to_string(),
                hresult,
            });
        }
        let raw = NonNull::new(out).ok_or(CallError::Failed {
            method: "QueryInterface".to_string(),
            hresult: E_POINTER,
        })?;
        tracing::trace!(from = %self.descriptor.name(), to = %target.name(), "QueryInterface");
        unsafe { Instance::from_raw(raw, target.clone()) }
    }
}

impl Clone for Instance {
    /// # Panics
    /// AddRef 无法调用时 (对象的方法表已失效) panic, 不会交出没有引用的副本
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(copy) => copy,
            Err(err) => {
                tracing::error!(interface = %self.descriptor.name(), %err, "AddRef 失败");
                panic!("无法克隆 {} 实例: {err}", self.descriptor.name());
            }
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let _ = unsafe { self.invoke_raw(SLOT_RELEASE, &[]) };
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("interface", &self.descriptor.name())
            .field("raw", &self.raw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{iunknown, sequential_stream, stream};
    use memstream::{MemoryStream, create_stream};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refs(instance: &Instance) -> u32 {
        unsafe { com_abi::ref_count::<MemoryStream>(instance.as_raw()) }
    }

    #[test]
    fn test_clone_and_drop_balance_refs() {
        let unknown = unsafe { Instance::from_raw(create_stream(Vec::new()), iunknown()) }.unwrap();
        assert_eq!(refs(&unknown), 1);

        let copy = unknown.clone();
        assert_eq!(refs(&unknown), 2);
        drop(copy);
        assert_eq!(refs(&unknown), 1);

        let istream = unknown.query_interface(&stream()).unwrap();
        assert_eq!(refs(&unknown), 2);
        assert_eq!(istream.iid(), com_abi::iids::IID_ISTREAM);
        drop(istream);
        assert_eq!(refs(&unknown), 1);
    }

    static COUNTED_REFS: AtomicU32 = AtomicU32::new(1);

    unsafe extern "system" fn counted_add_ref(_: *mut RawObject, _: *const RawArg, _: usize) -> HResult {
        HResult((COUNTED_REFS.fetch_add(1, Ordering::SeqCst) + 1) as i32)
    }

    unsafe extern "system" fn counted_release(_: *mut RawObject, _: *const RawArg, _: usize) -> HResult {
        HResult((COUNTED_REFS.fetch_sub(1, Ordering::SeqCst) - 1) as i32)
    }

    unsafe extern "system" fn no_interface(_: *mut RawObject, _: *const RawArg, _: usize) -> HResult {
        com_abi::E_NOINTERFACE
    }

    static COUNTED_SLOTS: [com_abi::RawSlot; 3] = [no_interface, counted_add_ref, counted_release];
    static COUNTED_VTBL: com_abi::RawVTable = com_abi::RawVTable::new(&COUNTED_SLOTS);

    #[test]
    fn test_try_clone_without_table_keeps_count() {
        let mut object = RawObject { vtbl: &COUNTED_VTBL };
        let raw = NonNull::new(&mut object as *mut RawObject).unwrap();
        let instance = unsafe { Instance::from_raw(raw, iunknown()) }.unwrap();

        let copy = instance.try_clone().unwrap();
        assert_eq!(COUNTED_REFS.load(Ordering::SeqCst), 2);
        drop(copy);
        assert_eq!(COUNTED_REFS.load(Ordering::SeqCst), 1);

        // 方法表失效后 AddRef 无法调用, 不交出副本
        unsafe { (*raw.as_ptr()).vtbl = ptr::null() };
        let err = instance.try_clone().unwrap_err();
        assert!(matches!(err, CallError::NullTable));
        assert_eq!(COUNTED_REFS.load(Ordering::SeqCst), 1);

        unsafe { (*raw.as_ptr()).vtbl = &COUNTED_VTBL };
        drop(instance);
        assert_eq!(COUNTED_REFS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_query_unknown_interface() {
        let unknown = unsafe { Instance::from_raw(create_stream(Vec::new()), iunknown()) }.unwrap();
        let other = crate::descriptor::InterfaceBuilder::new("IOther", "99999999-0000-0000-0000-000000000001")
            .extends(&iunknown())
            .build()
            .unwrap();
        let err = unknown.query_interface(&other).unwrap_err();
        assert_eq!(err.hresult(), Some(com_abi::E_NOINTERFACE));
        assert_eq!(refs(&unknown), 1);
    }

    #[test]
    fn test_short_table_rejected() {
        let unknown = unsafe { Instance::from_raw(create_stream(Vec::new()), iunknown()) }.unwrap();
        let seq = unknown.query_interface(&sequential_stream()).unwrap();
        let wide = crate::descriptor::InterfaceBuilder::new("IWide", "99999999-0000-0000-0000-000000000002")
            .extends(&stream())
            .method(crate::descriptor::MethodDescriptor::new("Extra"))
            .build()
            .unwrap();

        // 多拿一个引用交给 from_raw, 失败时它会被释放
        let raw = seq.clone();
        let ptr = NonNull::new(raw.as_raw()).unwrap();
        std::mem::forget(raw);
        let err = unsafe { Instance::from_raw(ptr, wide) }.unwrap_err();
        assert!(matches!(err, CallError::Layout { expected: 13, actual: 12, .. }));
        assert_eq!(refs(&seq), 2);
    }
}
