//! 进程内组件的公共部分: 对象布局、引用计数和 IUnknown 三个槽

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering, fence};

use crate::abi::{RawArg, RawObject, RawVTable, frame};
use crate::hresult::{E_NOINTERFACE, E_POINTER, HResult, S_OK};
use crate::iids::IID_IUNKNOWN;
use crate::Guid;

/// 进程内组件 trait
/// 所有通过 `ServerObject` 暴露的组件都必须实现此 trait
pub trait ComServer: Send + Sync + 'static {
    /// QueryInterface 能够应答的接口 (IUnknown 总是可以应答)
    const INTERFACES: &'static [Guid];

    /// 获取组件名称（用于调试）
    fn name(&self) -> &str {
        "unknown"
    }
}

/// 组件对象: 对象头必须是第一个字段
#[repr(C)]
pub struct ServerObject<T: ComServer> {
    header: RawObject,
    refs: AtomicU32,
    server: T,
}

impl<T: ComServer> ServerObject<T> {
    /// 创建对象, 返回的指针持有一个引用
    pub fn create(server: T, vtbl: &'static RawVTable) -> NonNull<RawObject> {
        let object = Box::new(Self {
            header: RawObject { vtbl },
            refs: AtomicU32::new(1),
            server,
        });
        NonNull::from(Box::leak(object)).cast()
    }

    /// 从 `this` 取回组件状态
    ///
    /// # Safety
    /// `this` 必须为空或者是 `create::<T>` 返回的存活对象
    pub unsafe fn server<'a>(this: *mut RawObject) -> Option<&'a T> {
        unsafe { this.cast::<Self>().as_ref() }.map(|object| &object.server)
    }
}

/// 当前引用计数
///
/// # Safety
/// 同 `ServerObject::server`
pub unsafe fn ref_count<T: ComServer>(this: *mut RawObject) -> u32 {
    unsafe { this.cast::<ServerObject<T>>().as_ref() }
        .map(|object| object.refs.load(Ordering::Acquire))
        .unwrap_or(0)
}

/// 槽 0: QueryInterface(in riid, out ppv)
///
/// # Safety
/// 只能通过方法表调用
pub unsafe extern "system" fn query_interface<T: ComServer>(
    this: *mut RawObject,
    args: *const RawArg,
    argc: usize,
) -> HResult {
    let args = match unsafe { frame(args, argc, 2) } {
        Ok(args) => args,
        Err(hr) => return hr,
    };
    let riid = unsafe { args[0].as_ptr::<Guid>() };
    let ppv = unsafe { args[1].as_ptr::<*mut RawObject>() };
    if ppv.is_null() {
        return E_POINTER;
    }
    if riid.is_null() {
        unsafe { ppv.write(ptr::null_mut()) };
        return E_POINTER;
    }

    let iid = unsafe { riid.read() };
    if iid == IID_IUNKNOWN || T::INTERFACES.contains(&iid) {
        // 单继承链上的接口共用同一张方法表
        unsafe {
            add_ref::<T>(this, ptr::null(), 0);
            ppv.write(this);
        }
        S_OK
    } else {
        unsafe { ppv.write(ptr::null_mut()) };
        E_NOINTERFACE
    }
}

/// 槽 1: AddRef(), 新的引用计数作为成功状态返回
///
/// # Safety
/// 只能通过方法表调用
pub unsafe extern "system" fn add_ref<T: ComServer>(
    this: *mut RawObject,
    _args: *const RawArg,
    _argc: usize,
) -> HResult {
    let Some(object) = (unsafe { this.cast::<ServerObject<T>>().as_ref() }) else {
        return E_POINTER;
    };
    let count = object.refs.fetch_add(1, Ordering::Relaxed) + 1;
    HResult(count as i32)
}

/// 槽 2: Release(), 计数归零时释放对象
///
/// # Safety
/// 只能通过方法表调用, 每个引用只能释放一次
pub unsafe extern "system" fn release<T: ComServer>(
    this: *mut RawObject,
    _args: *const RawArg,
    _argc: usize,
) -> HResult {
    let object_ptr = this.cast::<ServerObject<T>>();
    let Some(object) = (unsafe { object_ptr.as_ref() }) else {
        return E_POINTER;
    };
    let count = object.refs.fetch_sub(1, Ordering::Release) - 1;
    if count == 0 {
        fence(Ordering::Acquire);
        drop(unsafe { Box::from_raw(object_ptr) });
    }
    HResult(count as i32)
}
