//! 测试用探针组件
//!
//! 覆盖通用编组的各种形状: 无输出、多输出、in-out、浮点、GUID、
//! 失败时写过的输出和需要覆盖的按大小输出。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};

use com_abi::{
    ComServer, E_FAIL, E_POINTER, Guid, HResult, RawArg, RawObject, RawSlot, RawVTable, S_OK, ServerObject, add_ref,
    frame, query_interface, release,
};

use crate::binding::{BindingSet, MethodOverride, OverrideTable, sized_read};
use crate::descriptor::{InterfaceBuilder, InterfaceDescriptor, MethodDescriptor, ParamType};
use crate::instance::Instance;
use crate::interfaces::iunknown;

pub const IID_IPROBE: Guid = Guid::from_u128(0x5A1C_0DE5_0000_4000_8000_00000000BEEF);

/// overreport 取这个值时 Fill 返回 E_FAIL
pub const FILL_FAILS: u32 = u32::MAX;

pub const PROBE_OVERRIDES: &[MethodOverride] = &[
    MethodOverride {
        name: "Fill",
        build: sized_read,
    },
    MethodOverride {
        name: "FillShort",
        build: sized_read,
    },
];

static PROBE: LazyLock<Arc<InterfaceDescriptor>> = LazyLock::new(|| {
    InterfaceBuilder::with_guid("IProbe", IID_IPROBE)
        .extends(&iunknown())
        .method(MethodDescriptor::new("Fail").input("code", ParamType::I32))
        .method(
            MethodDescriptor::new("Pair")
                .input("a", ParamType::U32)
                .input("b", ParamType::U32)
                .output("sum", ParamType::ptr(ParamType::U32))
                .output("product", ParamType::ptr(ParamType::U64)),
        )
        .method(MethodDescriptor::new("Bump").in_out("counter", ParamType::ptr(ParamType::U32)))
        .method(MethodDescriptor::new("Poison").output("value", ParamType::ptr(ParamType::U32)))
        .method(
            MethodDescriptor::new("Scale")
                .input("factor", ParamType::F64)
                .input("value", ParamType::F32)
                .output("result", ParamType::ptr(ParamType::F64)),
        )
        .method(
            MethodDescriptor::new("Echo")
                .input("id", ParamType::ptr(ParamType::Guid))
                .output("copy", ParamType::ptr(ParamType::Guid)),
        )
        .method(
            MethodDescriptor::new("Fill")
                .output("pv", ParamType::ptr(ParamType::U8))
                .input("cb", ParamType::U32)
                .output("pcbFilled", ParamType::ptr(ParamType::U32))
                .size_is("pv", "cb"),
        )
        .method(MethodDescriptor::new("Calls").output("count", ParamType::ptr(ParamType::U32)))
        .method(
            MethodDescriptor::new("GetFlag")
                .input("index", ParamType::U32)
                .output("flag", ParamType::ptr(ParamType::U8)),
        )
        .method(MethodDescriptor::new("Invert").in_out("bits", ParamType::ptr(ParamType::U8)))
        .method(
            MethodDescriptor::new("FillShort")
                .output("data", ParamType::ptr(ParamType::U8))
                .input("len", ParamType::U16)
                .output("written", ParamType::ptr(ParamType::U16))
                .size_is("data", "len"),
        )
        .build()
        .unwrap()
});

pub fn probe() -> Arc<InterfaceDescriptor> {
    PROBE.clone()
}

pub fn probe_bindings() -> BindingSet {
    let mut table = OverrideTable::new();
    table.register(IID_IPROBE, PROBE_OVERRIDES);
    BindingSet::generate(&probe(), &table).unwrap()
}

struct Probe {
    calls: AtomicU32,
    overreport: u32,
}

impl ComServer for Probe {
    const INTERFACES: &'static [Guid] = &[IID_IPROBE];
}

static SLOTS: [RawSlot; 14] = [
    query_interface::<Probe>,
    add_ref::<Probe>,
    release::<Probe>,
    fail,
    pair,
    bump,
    poison,
    scale,
    echo,
    fill,
    calls,
    get_flag,
    invert,
    fill_short,
];

static VTBL: RawVTable = RawVTable::new(&SLOTS);

/// Fill 和 FillShort 报告的字节数比实际写入的多 `overreport`
pub fn probe_instance(overreport: u32) -> Instance {
    let raw = ServerObject::create(
        Probe {
            calls: AtomicU32::new(0),
            overreport,
        },
        &VTBL,
    );
    unsafe { Instance::from_raw(raw, probe()) }.unwrap()
}

unsafe fn enter<'a>(this: *mut RawObject, args: *const RawArg, argc: usize, expected: usize) -> Result<(&'a Probe, &'a [RawArg]), HResult> {
    let probe = unsafe { ServerObject::<Probe>::server(this) }.ok_or(E_POINTER)?;
    probe.calls.fetch_add(1, Ordering::Relaxed);
    Ok((probe, unsafe { frame(args, argc, expected) }?))
}

fn status(result: Result<HResult, HResult>) -> HResult {
    result.unwrap_or_else(|hr| hr)
}

unsafe extern "system" fn fail(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 1).map(|(_, args)| HResult(args[0].as_word() as i32))
    })
}

unsafe extern "system" fn pair(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 4).map(|(_, args)| {
            let a = args[0].as_word() as u32;
            let b = args[1].as_word() as u32;
            args[2].as_ptr::<u32>().write(a.wrapping_add(b));
            args[3].as_ptr::<u64>().write(a as u64 * b as u64);
            S_OK
        })
    })
}

unsafe extern "system" fn bump(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 1).map(|(_, args)| {
            let counter = args[0].as_ptr::<u32>();
            counter.write(counter.read() + 1);
            S_OK
        })
    })
}

unsafe extern "system" fn poison(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 1).map(|(_, args)| {
            args[0].as_ptr::<u32>().write(0xDEAD_BEEF);
            E_FAIL
        })
    })
}

unsafe extern "system" fn scale(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 3).map(|(_, args)| {
            let factor = args[0].as_float();
            let value = args[1].as_float();
            args[2].as_ptr::<f64>().write(factor * value);
            S_OK
        })
    })
}

unsafe extern "system" fn echo(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 2).map(|(_, args)| {
            let id = args[0].as_ptr::<Guid>().read();
            args[1].as_ptr::<Guid>().write(id);
            S_OK
        })
    })
}

unsafe extern "system" fn fill(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 3).map(|(probe, args)| {
            if probe.overreport == FILL_FAILS {
                return E_FAIL;
            }
            let pv = args[0].as_ptr::<u8>();
            let cb = args[1].as_word() as u32;
            let filled = cb / 2;
            if filled > 0 {
                std::ptr::write_bytes(pv, 0xAB, filled as usize);
            }
            args[2].as_ptr::<u32>().write(filled + probe.overreport);
            S_OK
        })
    })
}

unsafe extern "system" fn calls(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 1).map(|(probe, args)| {
            args[0].as_ptr::<u32>().write(probe.calls.load(Ordering::Relaxed));
            S_OK
        })
    })
}


unsafe extern "system" fn get_flag(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 2).map(|(_, args)| {
            let index = args[0].as_word() as u32;
            args[1].as_ptr::<u8>().write((index & 1) as u8);
            S_OK
        })
    })
}

unsafe extern "system" fn invert(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 1).map(|(_, args)| {
            let bits = args[0].as_ptr::<u8>();
            bits.write(!bits.read());
            S_OK
        })
    })
}

/// 计数只有两个字节宽, 只写计数存储的前两个字节
unsafe extern "system" fn fill_short(this: *mut RawObject, args: *const RawArg, argc: usize) -> HResult {
    status(unsafe {
        enter(this, args, argc, 3).map(|(probe, args)| {
            let data = args[0].as_ptr::<u8>();
            let len = args[1].as_word() as u16;
            let written = len / 2;
            if written > 0 {
                std::ptr::write_bytes(data, 0xCD, written as usize);
            }
            args[2].as_ptr::<u16>().write(written.wrapping_add(probe.overreport as u16));
            S_OK
        })
    })
}
