//! 内存流组件
//!
//! 在可增长的内存缓冲区上实现 IStream (包括 ISequentialStream),
//! 行为与建立在全局内存上的流一致: 写入自动扩展, 读取最多返回请求的字节数,
//! 到达末尾时返回 0 字节。
//!
//! 方法表 (槽位):
//! - 0..2: IUnknown
//! - 3: RemoteRead(out pv, in cb, out pcbRead)
//! - 4: RemoteWrite(in pv, in cb, out pcbWritten)
//! - 5: RemoteSeek(in dlibMove, in dwOrigin, out plibNewPosition)
//! - 6: SetSize(in libNewSize)
//! - 7: CopyTo(in pstm, in cb, out pcbRead, out pcbWritten)
//! - 8: Commit(in grfCommitFlags)
//! - 9: Revert()
//! - 10: LockRegion(in libOffset, in cb, in dwLockType)
//! - 11: UnlockRegion(in libOffset, in cb, in dwLockType)

use std::ptr::{self, NonNull};
use std::sync::Mutex;

use com_abi::iids::{IID_ISEQUENTIALSTREAM, IID_ISTREAM};
use com_abi::{
    ComServer, E_NOINTERFACE, E_OUTOFMEMORY, E_POINTER, E_UNEXPECTED, Guid, HResult, RawArg,
    RawObject, RawSlot, RawVTable, S_OK, STG_E_INVALIDFUNCTION, STG_E_INVALIDPOINTER,
    ServerObject, add_ref, frame, query_interface, release,
};

/// 内存流的类标识 {6E1B4C1A-3F0D-4B8C-9A57-2C4E8D1F0B73}
pub const CLSID_MEMORY_STREAM: Guid = Guid::from_u128(0x6E1B4C1A_3F0D_4B8C_9A57_2C4E8D1F0B73);

/// Seek 起点
pub const STREAM_SEEK_SET: u32 = 0;
pub const STREAM_SEEK_CUR: u32 = 1;
pub const STREAM_SEEK_END: u32 = 2;

/// RemoteWrite 所在槽位, CopyTo 通过目标的方法表调用它
const SLOT_REMOTE_WRITE: usize = 4;

struct StreamState {
    data: Vec<u8>,
    pos: u64,
}

/// 内存流组件
pub struct MemoryStream {
    name: String,
    state: Mutex<StreamState>,
}

impl ComServer for MemoryStream {
    const INTERFACES: &'static [Guid] = &[IID_ISEQUENTIALSTREAM, IID_ISTREAM];

    fn name(&self) -> &str {
        &self.name
    }
}

static SLOTS: [RawSlot; 12] = [
    query_interface::<MemoryStream>,
    add_ref::<MemoryStream>,
    release::<MemoryStream>,
    remote_read,
    remote_write,
    remote_seek,
    set_size,
    copy_to,
    commit,
    revert,
    lock_region,
    unlock_region,
];

static VTBL: RawVTable = RawVTable::new(&SLOTS);

/// 创建内存流, 初始内容为 `initial`, seek 指针位于开头
/// 返回的对象持有一个引用
pub fn create_stream(initial: Vec<u8>) -> NonNull<RawObject> {
    create_named("memory_stream", initial)
}

pub fn create_named(name: impl Into<String>, initial: Vec<u8>) -> NonNull<RawObject> {
    let stream = MemoryStream {
        name: name.into(),
        state: Mutex::new(StreamState {
            data: initial,
            pos: 0,
        }),
    };
    ServerObject::create(stream, &VTBL)
}

fn status(result: Result<(), HResult>) -> HResult {
    match result {
        Ok(()) => S_OK,
        Err(hr) => hr,
    }
}

/// # Safety
/// `this` 必须是本组件创建的存活对象
unsafe fn with_state<R>(
    this: *mut RawObject,
    f: impl FnOnce(&mut StreamState) -> Result<R, HResult>,
) -> Result<R, HResult> {
    let stream = unsafe { ServerObject::<MemoryStream>::server(this) }.ok_or(E_POINTER)?;
    let mut state = stream.state.lock().map_err(|_| E_UNEXPECTED)?;
    f(&mut state)
}

/// 从 seek 指针处取出最多 `limit` 字节并前移指针
fn take(state: &mut StreamState, limit: u64) -> &[u8] {
    let len = state.data.len() as u64;
    let start = state.pos.min(len);
    let count = limit.min(len - start);
    state.pos = start + count;
    &state.data[start as usize..(start + count) as usize]
}

unsafe extern "system" fn remote_read(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe { read_impl(this, args, argc) })
}

unsafe fn read_impl(this: *mut RawObject, args: *const RawArg, argc: usize) -> Result<(), HResult> {
    let args = unsafe { frame(args, argc, 3) }?;
    let pv = unsafe { args[0].as_ptr::<u8>() };
    let cb = unsafe { args[1].as_word() } as u32;
    let pcb_read = unsafe { args[2].as_ptr::<u32>() };
    if pv.is_null() && cb > 0 {
        return Err(STG_E_INVALIDPOINTER);
    }

    let read = unsafe {
        with_state(this, |state| {
            let chunk = take(state, cb as u64);
            // 调用方保证 pv 至少有 cb 字节
            if !chunk.is_empty() {
                ptr::copy_nonoverlapping(chunk.as_ptr(), pv, chunk.len());
            }
            Ok(chunk.len() as u32)
        })
    }?;
    if !pcb_read.is_null() {
        unsafe { pcb_read.write(read) };
    }
    Ok(())
}

unsafe extern "system" fn remote_write(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe { write_impl(this, args, argc) })
}

unsafe fn write_impl(this: *mut RawObject, args: *const RawArg, argc: usize) -> Result<(), HResult> {
    let args = unsafe { frame(args, argc, 3) }?;
    let pv = unsafe { args[0].as_ptr::<u8>() }.cast_const();
    let cb = unsafe { args[1].as_word() } as u32;
    let pcb_written = unsafe { args[2].as_ptr::<u32>() };
    if pv.is_null() && cb > 0 {
        return Err(STG_E_INVALIDPOINTER);
    }
    let input: &[u8] = if cb == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(pv, cb as usize) }
    };

    unsafe {
        with_state(this, |state| {
            let start = usize::try_from(state.pos).map_err(|_| E_OUTOFMEMORY)?;
            let end = start + input.len();
            if end > state.data.len() {
                state
                    .data
                    .try_reserve(end - state.data.len())
                    .map_err(|_| E_OUTOFMEMORY)?;
                state.data.resize(end, 0);
            }
            state.data[start..end].copy_from_slice(input);
            state.pos = end as u64;
            Ok(())
        })
    }?;
    if !pcb_written.is_null() {
        unsafe { pcb_written.write(cb) };
    }
    Ok(())
}

unsafe extern "system" fn remote_seek(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe { seek_impl(this, args, argc) })
}

unsafe fn seek_impl(this: *mut RawObject, args: *const RawArg, argc: usize) -> Result<(), HResult> {
    let args = unsafe { frame(args, argc, 3) }?;
    let dlib_move = unsafe { args[0].as_word() } as i64;
    let origin = unsafe { args[1].as_word() } as u32;
    let plib_new_position = unsafe { args[2].as_ptr::<u64>() };

    let position = unsafe {
        with_state(this, |state| {
            let base = match origin {
                STREAM_SEEK_SET => 0,
                STREAM_SEEK_CUR => state.pos as i64,
                STREAM_SEEK_END => state.data.len() as i64,
                _ => return Err(STG_E_INVALIDFUNCTION),
            };
            let target = base
                .checked_add(dlib_move)
                .filter(|p| *p >= 0)
                .ok_or(STG_E_INVALIDFUNCTION)?;
            state.pos = target as u64;
            Ok(state.pos)
        })
    }?;
    if !plib_new_position.is_null() {
        unsafe { plib_new_position.write(position) };
    }
    Ok(())
}

unsafe extern "system" fn set_size(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe { set_size_impl(this, args, argc) })
}

unsafe fn set_size_impl(this: *mut RawObject, args: *const RawArg, argc: usize) -> Result<(), HResult> {
    let args = unsafe { frame(args, argc, 1) }?;
    let new_size = usize::try_from(unsafe { args[0].as_word() }).map_err(|_| E_OUTOFMEMORY)?;
    unsafe {
        with_state(this, |state| {
            if new_size > state.data.len() {
                state
                    .data
                    .try_reserve(new_size - state.data.len())
                    .map_err(|_| E_OUTOFMEMORY)?;
            }
            state.data.resize(new_size, 0);
            Ok(())
        })
    }
}

unsafe extern "system" fn copy_to(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe { copy_to_impl(this, args, argc) })
}

unsafe fn copy_to_impl(this: *mut RawObject, args: *const RawArg, argc: usize) -> Result<(), HResult> {
    let args = unsafe { frame(args, argc, 4) }?;
    let pstm = unsafe { args[0].as_ptr::<RawObject>() };
    let cb = unsafe { args[1].as_word() };
    let pcb_read = unsafe { args[2].as_ptr::<u64>() };
    let pcb_written = unsafe { args[3].as_ptr::<u64>() };

    let dest = unsafe { RawObject::vtable(pstm) }.ok_or(STG_E_INVALIDPOINTER)?;
    let write = dest.slot(SLOT_REMOTE_WRITE).ok_or(E_NOINTERFACE)?;

    // 先复制出来再释放锁, 目标可能就是自己
    let chunk = unsafe { with_state(this, |state| Ok(take(state, cb).to_vec())) }?;

    let mut total_written = 0u64;
    let mut result = Ok(());
    for piece in chunk.chunks(u32::MAX as usize) {
        let mut written = 0u32;
        let call = [
            RawArg::const_ptr(piece.as_ptr()),
            RawArg::word(piece.len() as u64),
            RawArg::ptr(&mut written),
        ];
        let hr = unsafe { write(pstm, call.as_ptr(), call.len()) };
        total_written += written as u64;
        if hr.is_err() {
            result = Err(hr);
            break;
        }
    }

    if !pcb_read.is_null() {
        unsafe { pcb_read.write(chunk.len() as u64) };
    }
    if !pcb_written.is_null() {
        unsafe { pcb_written.write(total_written) };
    }
    result
}

unsafe extern "system" fn commit(_this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    // 内存流没有后备存储, 提交总是成功
    status(unsafe { frame(args, argc, 1) }.map(|_| ()))
}

unsafe extern "system" fn revert(_this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe { frame(args, argc, 0) }.map(|_| ()))
}

unsafe extern "system" fn lock_region(_this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    match unsafe { frame(args, argc, 3) } {
        Ok(_) => STG_E_INVALIDFUNCTION,
        Err(hr) => hr,
    }
}

unsafe extern "system" fn unlock_region(_this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    match unsafe { frame(args, argc, 3) } {
        Ok(_) => STG_E_INVALIDFUNCTION,
        Err(hr) => hr,
    }
}
