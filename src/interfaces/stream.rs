//! ISequentialStream / IStream
//!
//! RemoteRead 的输出缓冲区大小由 cb 决定, 通过 `sized_read` 覆盖调用;
//! 其余方法都使用通用绑定。

use std::sync::{Arc, LazyLock};

use com_abi::iids::{IID_ISEQUENTIALSTREAM, IID_ISTREAM};

use super::iunknown;
use crate::activation::{ActivationContext, ActivationError, Activator};
use crate::binding::{BindingSet, CallError, MethodOverride, sized_read};
use crate::descriptor::{InterfaceBuilder, InterfaceDescriptor, MethodDescriptor, ParamType};
use crate::instance::Instance;
use crate::registry::BindingRegistry;
use crate::value::{Returned, Value};

pub const SEQUENTIAL_STREAM_OVERRIDES: &[MethodOverride] = &[MethodOverride {
    name: "RemoteRead",
    build: sized_read,
}];

static SEQUENTIAL_STREAM: LazyLock<Arc<InterfaceDescriptor>> = LazyLock::new(|| {
    InterfaceBuilder::with_guid("ISequentialStream", IID_ISEQUENTIALSTREAM)
        .extends(&iunknown())
        .method(
            MethodDescriptor::new("RemoteRead")
                .output("pv", ParamType::ptr(ParamType::U8))
                .input("cb", ParamType::U32)
                .output("pcbRead", ParamType::ptr(ParamType::U32))
                .size_is("pv", "cb"),
        )
        .method(
            MethodDescriptor::new("RemoteWrite")
                .input("pv", ParamType::ptr(ParamType::U8))
                .input("cb", ParamType::U32)
                .output("pcbWritten", ParamType::ptr(ParamType::U32)),
        )
        .build()
        .expect("ISequentialStream 描述是静态定义的")
});

static STREAM: LazyLock<Arc<InterfaceDescriptor>> = LazyLock::new(|| {
    let region = |name: &str| {
        MethodDescriptor::new(name)
            .input("libOffset", ParamType::U64)
            .input("cb", ParamType::U64)
            .input("dwLockType", ParamType::U32)
    };
    InterfaceBuilder::with_guid("IStream", IID_ISTREAM)
        .extends(&sequential_stream())
        .method(
            MethodDescriptor::new("RemoteSeek")
                .input("dlibMove", ParamType::I64)
                .input("dwOrigin", ParamType::U32)
                .output("plibNewPosition", ParamType::ptr(ParamType::U64)),
        )
        .method(MethodDescriptor::new("SetSize").input("libNewSize", ParamType::U64))
        .method(
            MethodDescriptor::new("RemoteCopyTo")
                .input("pstm", ParamType::RawPtr)
                .input("cb", ParamType::U64)
                .output("pcbRead", ParamType::ptr(ParamType::U64))
                .output("pcbWritten", ParamType::ptr(ParamType::U64)),
        )
        .method(MethodDescriptor::new("Commit").input("grfCommitFlags", ParamType::U32))
        .method(MethodDescriptor::new("Revert"))
        .method(region("LockRegion"))
        .method(region("UnlockRegion"))
        .build()
        .expect("IStream 描述是静态定义的")
});

pub fn sequential_stream() -> Arc<InterfaceDescriptor> {
    SEQUENTIAL_STREAM.clone()
}

pub fn stream() -> Arc<InterfaceDescriptor> {
    STREAM.clone()
}

/// Seek 起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Set,
    Current,
    End,
}

impl From<SeekOrigin> for u32 {
    fn from(origin: SeekOrigin) -> u32 {
        match origin {
            SeekOrigin::Set => 0,
            SeekOrigin::Current => 1,
            SeekOrigin::End => 2,
        }
    }
}

fn unexpected(method: &str) -> CallError {
    CallError::UnexpectedResult {
        method: method.to_string(),
    }
}

fn take<T: TryFrom<Value>>(value: Option<Value>, method: &str) -> Result<T, CallError> {
    value
        .and_then(|value| T::try_from(value).ok())
        .ok_or_else(|| unexpected(method))
}

fn expect_empty(returned: Returned, method: &str) -> Result<(), CallError> {
    if returned.is_empty() { Ok(()) } else { Err(unexpected(method)) }
}

fn remote_read(bindings: &BindingSet, instance: &Instance, cb: u32) -> Result<(Vec<u8>, u32), CallError> {
    // sized_read 只读 cb 字节到自己分配的缓冲区
    let returned = unsafe { bindings.call(instance, "RemoteRead", &[Value::U32(cb)]) }?;
    let (data, count) = returned.pair().ok_or_else(|| unexpected("RemoteRead"))?;
    Ok((take(Some(data), "RemoteRead")?, take(Some(count), "RemoteRead")?))
}

fn remote_write(bindings: &BindingSet, instance: &Instance, data: &[u8]) -> Result<u32, CallError> {
    let cb = u32::try_from(data.len()).map_err(|_| CallError::TooLarge {
        method: "RemoteWrite".to_string(),
        param: "pv".to_string(),
        len: data.len() as u64,
    })?;
    // cb 就是缓冲区长度
    let args = [Value::Bytes(data.to_vec()), Value::U32(cb)];
    let returned = unsafe { bindings.call(instance, "RemoteWrite", &args) }?;
    take(returned.single(), "RemoteWrite")
}

/// ISequentialStream 的类型化包装
#[derive(Debug, Clone)]
pub struct SequentialStream {
    instance: Instance,
    bindings: Arc<BindingSet>,
}

impl SequentialStream {
    pub fn bind(registry: &BindingRegistry, instance: Instance) -> Result<Self, CallError> {
        if !instance.descriptor().is_a(&IID_ISEQUENTIALSTREAM) {
            return Err(CallError::WrongInterface {
                expected: IID_ISEQUENTIALSTREAM,
                actual: instance.iid(),
            });
        }
        let bindings = registry.bindings_for(instance.descriptor())?;
        Ok(Self { instance, bindings })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// 最多读取 `cb` 字节, 返回读到的字节和实际字节数
    pub fn remote_read(&self, cb: u32) -> Result<(Vec<u8>, u32), CallError> {
        remote_read(&self.bindings, &self.instance, cb)
    }

    pub fn remote_write(&self, data: &[u8]) -> Result<u32, CallError> {
        remote_write(&self.bindings, &self.instance, data)
    }
}

/// IStream 的类型化包装
#[derive(Debug, Clone)]
pub struct Stream {
    instance: Instance,
    bindings: Arc<BindingSet>,
}

impl Stream {
    pub fn bind(registry: &BindingRegistry, instance: Instance) -> Result<Self, CallError> {
        if !instance.descriptor().is_a(&IID_ISTREAM) {
            return Err(CallError::WrongInterface {
                expected: IID_ISTREAM,
                actual: instance.iid(),
            });
        }
        let bindings = registry.bindings_for(instance.descriptor())?;
        Ok(Self { instance, bindings })
    }

    /// 激活类并请求 IStream
    pub fn activate(
        activator: &impl Activator,
        registry: &BindingRegistry,
        clsid: &com_abi::Guid,
        context: ActivationContext,
    ) -> Result<Self, ActivationError> {
        let instance = activator.activate(clsid, &stream(), context)?;
        Ok(Self::bind(registry, instance)?)
    }

    /// 在内存流组件上创建, 初始内容为 `initial`
    pub fn on_memory(registry: &BindingRegistry, initial: Vec<u8>) -> Result<Self, CallError> {
        let unknown = unsafe { Instance::from_raw(memstream::create_stream(initial), iunknown()) }?;
        Self::bind(registry, unknown.query_interface(&stream())?)
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn remote_read(&self, cb: u32) -> Result<(Vec<u8>, u32), CallError> {
        remote_read(&self.bindings, &self.instance, cb)
    }

    pub fn remote_write(&self, data: &[u8]) -> Result<u32, CallError> {
        remote_write(&self.bindings, &self.instance, data)
    }

    /// 返回新的位置
    pub fn remote_seek(&self, offset: i64, origin: SeekOrigin) -> Result<u64, CallError> {
        let args = [Value::I64(offset), Value::U32(origin.into())];
        let returned = unsafe { self.bindings.call(&self.instance, "RemoteSeek", &args) }?;
        take(returned.single(), "RemoteSeek")
    }

    pub fn set_size(&self, size: u64) -> Result<(), CallError> {
        let returned = unsafe { self.bindings.call(&self.instance, "SetSize", &[Value::U64(size)]) }?;
        expect_empty(returned, "SetSize")
    }

    /// 从当前位置复制最多 `cb` 字节到 `dest`, 返回 (读取, 写入) 字节数
    pub fn copy_to(&self, dest: &Stream, cb: u64) -> Result<(u64, u64), CallError> {
        // dest 在调用期间保持存活
        let args = [Value::Pointer(dest.instance.as_raw().cast()), Value::U64(cb)];
        let returned = unsafe { self.bindings.call(&self.instance, "RemoteCopyTo", &args) }?;
        let (read, written) = returned.pair().ok_or_else(|| unexpected("RemoteCopyTo"))?;
        Ok((take(Some(read), "RemoteCopyTo")?, take(Some(written), "RemoteCopyTo")?))
    }

    pub fn commit(&self, flags: u32) -> Result<(), CallError> {
        let returned = unsafe { self.bindings.call(&self.instance, "Commit", &[Value::U32(flags)]) }?;
        expect_empty(returned, "Commit")
    }

    pub fn revert(&self) -> Result<(), CallError> {
        let returned = unsafe { self.bindings.call(&self.instance, "Revert", &[]) }?;
        expect_empty(returned, "Revert")
    }

    pub fn lock_region(&self, offset: u64, cb: u64, lock_type: u32) -> Result<(), CallError> {
        let args = [Value::U64(offset), Value::U64(cb), Value::U32(lock_type)];
        let returned = unsafe { self.bindings.call(&self.instance, "LockRegion", &args) }?;
        expect_empty(returned, "LockRegion")
    }

    pub fn unlock_region(&self, offset: u64, cb: u64, lock_type: u32) -> Result<(), CallError> {
        let args = [Value::U64(offset), Value::U64(cb), Value::U32(lock_type)];
        let returned = unsafe { self.bindings.call(&self.instance, "UnlockRegion", &args) }?;
        expect_empty(returned, "UnlockRegion")
    }

    /// 同一个组件的 ISequentialStream 视图
    pub fn as_sequential(&self, registry: &BindingRegistry) -> Result<SequentialStream, CallError> {
        let instance = self.instance.query_interface(&sequential_stream())?;
        SequentialStream::bind(registry, instance)
    }
}
