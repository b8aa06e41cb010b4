//! 统一调用帧与方法表布局
//!
//! 每个方法槽都使用同一个签名: `this` 指针 + 参数帧 + 参数个数, 返回状态码。
//! `in` 参数按值放入帧 (整数扩展到 64 位, 浮点数为 f64),
//! `out` / `in-out` 参数放入调用方存储的地址。

use std::ffi::c_void;

use crate::hresult::{E_INVALIDARG, E_POINTER, HResult};

/// 参数帧中的一个参数
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawArg {
    pub word: u64,
    pub float: f64,
    pub ptr: *mut c_void,
}

impl RawArg {
    pub const fn word(value: u64) -> Self {
        Self { word: value }
    }

    pub const fn float(value: f64) -> Self {
        Self { float: value }
    }

    pub fn ptr<T>(ptr: *mut T) -> Self {
        Self { ptr: ptr.cast() }
    }

    pub fn const_ptr<T>(ptr: *const T) -> Self {
        Self {
            ptr: ptr.cast_mut().cast(),
        }
    }

    /// # Safety
    /// 调用方必须保证该参数是按整数写入的
    pub unsafe fn as_word(self) -> u64 {
        unsafe { self.word }
    }

    /// # Safety
    /// 调用方必须保证该参数是按浮点数写入的
    pub unsafe fn as_float(self) -> f64 {
        unsafe { self.float }
    }

    /// # Safety
    /// 调用方必须保证该参数是按指针写入的
    pub unsafe fn as_ptr<T>(self) -> *mut T {
        unsafe { self.ptr.cast() }
    }
}

impl Default for RawArg {
    fn default() -> Self {
        Self::word(0)
    }
}

/// 方法槽签名
pub type RawSlot =
    unsafe extern "system" fn(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult;

/// 带长度前缀的静态方法表
#[repr(C)]
pub struct RawVTable {
    len: usize,
    slots: *const RawSlot,
}

// 方法表只读且位于静态存储区
unsafe impl Sync for RawVTable {}

impl RawVTable {
    pub const fn new(slots: &'static [RawSlot]) -> Self {
        Self {
            len: slots.len(),
            slots: slots.as_ptr(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn slot(&self, index: usize) -> Option<RawSlot> {
        if index < self.len {
            // index 已经检查过边界
            Some(unsafe { *self.slots.add(index) })
        } else {
            None
        }
    }
}

/// 二进制对象头: 第一个字段永远是方法表指针
#[repr(C)]
pub struct RawObject {
    pub vtbl: *const RawVTable,
}

impl RawObject {
    /// # Safety
    /// `this` 必须为空或指向一个存活的对象
    pub unsafe fn vtable<'a>(this: *mut RawObject) -> Option<&'a RawVTable> {
        unsafe { this.as_ref()?.vtbl.as_ref() }
    }
}

/// 在方法槽实现中取出参数帧, 参数个数必须与声明一致
///
/// # Safety
/// `args` 必须指向至少 `argc` 个有效参数
pub unsafe fn frame<'a>(args: *const RawArg, argc: usize, expected: usize) -> Result<&'a [RawArg], HResult> {
    if argc != expected {
        return Err(E_INVALIDARG);
    }
    if argc == 0 {
        return Ok(&[]);
    }
    if args.is_null() {
        return Err(E_POINTER);
    }
    Ok(unsafe { std::slice::from_raw_parts(args, argc) })
}
