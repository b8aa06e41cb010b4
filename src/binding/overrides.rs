//! 方法覆盖表
//!
//! 覆盖按 (声明该方法的接口标识, 方法名) 登记, 派生接口自动沿用基接口的覆盖。
//! 每个覆盖是一个构造函数: 拿到槽位和方法描述, 返回替代通用编组的调用实现。

use std::mem;
use std::sync::Arc;

use com_abi::iids::IID_ISEQUENTIALSTREAM;
use com_abi::{E_OUTOFMEMORY, Guid, RawArg};
use rustc_hash::FxHashMap;

use super::marshal::Cell;
use super::{BindError, CallError, CustomCall};
use crate::descriptor::{MethodDescriptor, ParamDirection, ParamType};
use crate::instance::Instance;
use crate::value::{Returned, Value};

pub type OverrideBuilder = fn(slot: usize, method: &MethodDescriptor) -> Result<Arc<CustomCall>, BindError>;

/// 静态覆盖表中的一项
#[derive(Debug, Clone, Copy)]
pub struct MethodOverride {
    pub name: &'static str,
    pub build: OverrideBuilder,
}

#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: FxHashMap<Guid, FxHashMap<&'static str, OverrideBuilder>>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置接口需要的全部覆盖
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(IID_ISEQUENTIALSTREAM, crate::interfaces::SEQUENTIAL_STREAM_OVERRIDES);
        table
    }

    /// 为声明在 `iid` 上的方法登记覆盖, 同名的旧登记被替换
    pub fn register(&mut self, iid: Guid, overrides: &'static [MethodOverride]) -> &mut Self {
        let methods = self.entries.entry(iid).or_default();
        for item in overrides {
            methods.insert(item.name, item.build);
        }
        self
    }

    pub fn lookup(&self, owner: &Guid, method: &str) -> Option<OverrideBuilder> {
        self.entries.get(owner)?.get(method).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|methods| methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn shape_error(method: &MethodDescriptor, reason: impl Into<String>) -> BindError {
    BindError::OverrideShape {
        method: method.name().to_string(),
        reason: reason.into(),
    }
}

/// 按大小读取: `(out 缓冲区, in 大小 [, out 实际大小])`
///
/// 调用方只传请求的字节数。缓冲区按请求大小预分配,
/// 返回截断到实际大小的字节和实际大小。组件报告的大小超过请求时报错。
pub fn sized_read(slot: usize, method: &MethodDescriptor) -> Result<Arc<CustomCall>, BindError> {
    let shape = method
        .sized_output()
        .ok_or_else(|| shape_error(method, "没有 (输出缓冲区, 输入大小) 参数"))?;
    let params = method.params();
    if params[shape.buffer].direction() != ParamDirection::Out {
        return Err(shape_error(method, "缓冲区必须是纯输出参数"));
    }

    let mut reported = None;
    for (index, param) in params.iter().enumerate() {
        if index == shape.buffer || index == shape.count {
            continue;
        }
        let is_count = param.direction() == ParamDirection::Out
            && param.ty().pointee().is_some_and(ParamType::is_unsigned_integer);
        if !is_count || reported.is_some() {
            return Err(shape_error(method, format!("多余的参数 {}", param.name())));
        }
        reported = Some((index, param.storage_type().clone()));
    }

    let name = method.name().to_string();
    let count_index = shape.count;
    let count_name = params[shape.count].name().to_string();
    let count_type = params[shape.count].ty().clone();
    let buffer_index = shape.buffer;
    let param_count = params.len();

    let call: Arc<CustomCall> = Arc::new(move |instance: &Instance, args: &[Value]| {
        let [requested] = args else {
            return Err(CallError::ArgumentCount {
                method: name.clone(),
                expected: 1,
                actual: args.len(),
            });
        };
        let requested = requested
            .as_unsigned()
            .filter(|_| requested.matches(&count_type))
            .ok_or_else(|| CallError::ArgumentType {
                method: name.clone(),
                param: count_name.clone(),
                expected: count_type.clone(),
                actual: requested.type_name(),
            })?;
        let len = usize::try_from(requested).map_err(|_| CallError::TooLarge {
            method: name.clone(),
            param: count_name.clone(),
            len: requested,
        })?;

        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).map_err(|_| CallError::Failed {
            method: name.clone(),
            hresult: E_OUTOFMEMORY,
        })?;
        buffer.resize(len, 0u8);
        let mut reported_cell = Cell::default();

        let mut frame = vec![RawArg::default(); param_count];
        frame[buffer_index] = RawArg::ptr(buffer.as_mut_ptr());
        frame[count_index] = RawArg::word(requested);
        if let Some((index, _)) = &reported {
            frame[*index] = RawArg::ptr(reported_cell.as_mut_ptr());
        }

        let hresult = unsafe { instance.invoke_raw(slot, &frame) }?;
        if hresult.is_err() {
            return Err(CallError::Failed {
                method: name.clone(),
                hresult,
            });
        }

        // 按组件写入时的类型读出计数, 没有实际大小参数时视为读满
        let actual = match &reported {
            Some((_, ty)) => reported_cell.load(ty).as_unsigned().unwrap_or(0),
            None => requested,
        };
        if actual > requested {
            return Err(CallError::Overrun {
                method: name.clone(),
                requested,
                reported: actual,
            });
        }
        buffer.truncate(actual as usize);
        tracing::trace!(method = %name, requested, actual, "按大小读取");

        let mut outputs = Vec::with_capacity(2);
        for index in 0..param_count {
            if index == buffer_index {
                outputs.push(Value::Bytes(mem::take(&mut buffer)));
            } else if let Some((reported_index, ty)) = &reported {
                if index == *reported_index {
                    // actual <= requested, 不会超出声明类型
                    outputs.push(Value::unsigned(ty, actual).unwrap_or(Value::U64(actual)));
                }
            }
        }
        Ok(Returned::from_outputs(outputs))
    });
    Ok(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingSet;
    use crate::testing::{self, PROBE_OVERRIDES, probe, probe_instance};
    use com_abi::E_FAIL;

    fn probe_table() -> OverrideTable {
        let mut table = OverrideTable::new();
        table.register(testing::IID_IPROBE, PROBE_OVERRIDES);
        table
    }

    #[test]
    fn test_lookup_by_declaring_interface() {
        let table = OverrideTable::standard();
        assert_eq!(table.len(), 1);
        assert!(table.lookup(&IID_ISEQUENTIALSTREAM, "RemoteRead").is_some());
        assert!(table.lookup(&IID_ISEQUENTIALSTREAM, "RemoteWrite").is_none());
        assert!(table.lookup(&com_abi::iids::IID_ISTREAM, "RemoteRead").is_none());
    }

    #[test]
    fn test_sized_read_truncates_to_reported() {
        let set = BindingSet::generate(&probe(), &probe_table()).unwrap();
        let instance = probe_instance(0);
        let (data, count) = unsafe { set.call(&instance, "Fill", &[Value::U32(8)]) }
            .unwrap()
            .pair()
            .unwrap();
        // 探针最多写一半
        assert_eq!(data, Value::Bytes(vec![0xAB; 4]));
        assert_eq!(count, Value::U32(4));

        let (data, count) = unsafe { set.call(&instance, "Fill", &[Value::U32(0)]) }
            .unwrap()
            .pair()
            .unwrap();
        assert_eq!(data, Value::Bytes(Vec::new()));
        assert_eq!(count, Value::U32(0));
    }

    #[test]
    fn test_sized_read_overrun() {
        let set = BindingSet::generate(&probe(), &probe_table()).unwrap();
        let instance = probe_instance(10);
        let err = unsafe { set.call(&instance, "Fill", &[Value::U32(8)]) }.unwrap_err();
        assert!(matches!(
            err,
            CallError::Overrun {
                requested: 8,
                reported: 14,
                ..
            }
        ));
    }

    #[test]
    fn test_sized_read_argument_checks() {
        let set = BindingSet::generate(&probe(), &probe_table()).unwrap();
        let instance = probe_instance(0);
        let err = unsafe { set.call(&instance, "Fill", &[]) }.unwrap_err();
        assert!(matches!(err, CallError::ArgumentCount { expected: 1, actual: 0, .. }));
        let err = unsafe { set.call(&instance, "Fill", &[Value::U64(8)]) }.unwrap_err();
        assert!(matches!(err, CallError::ArgumentType { ref param, .. } if param == "cb"));
        let err = unsafe { set.call(&instance, "FillShort", &[Value::U32(8)]) }.unwrap_err();
        assert!(matches!(err, CallError::ArgumentType { ref param, .. } if param == "len"));
    }

    #[test]
    fn test_sized_read_narrow_count() {
        let set = BindingSet::generate(&probe(), &probe_table()).unwrap();
        let instance = probe_instance(0);
        let (data, written) = unsafe { set.call(&instance, "FillShort", &[Value::U16(6)]) }
            .unwrap()
            .pair()
            .unwrap();
        assert_eq!(data, Value::Bytes(vec![0xCD; 3]));
        assert_eq!(written, Value::U16(3));

        let instance = probe_instance(4);
        let err = unsafe { set.call(&instance, "FillShort", &[Value::U16(6)]) }.unwrap_err();
        assert!(matches!(
            err,
            CallError::Overrun {
                requested: 6,
                reported: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_sized_read_failure_status() {
        let set = BindingSet::generate(&probe(), &probe_table()).unwrap();
        let instance = probe_instance(testing::FILL_FAILS);
        let err = unsafe { set.call(&instance, "Fill", &[Value::U32(8)]) }.unwrap_err();
        assert_eq!(err.hresult(), Some(E_FAIL));
    }

    #[test]
    fn test_sized_read_rejects_other_shapes() {
        let plain = MethodDescriptor::new("Plain").input("x", ParamType::U32);
        assert!(matches!(sized_read(3, &plain), Err(BindError::OverrideShape { .. })));

        // 没有 size_is 声明时不按缓冲区处理
        let unsized_read = MethodDescriptor::new("Unsized")
            .output("pv", ParamType::ptr(ParamType::U8))
            .input("cb", ParamType::U32);
        assert!(matches!(sized_read(3, &unsized_read), Err(BindError::OverrideShape { .. })));

        let extra = MethodDescriptor::new("Extra")
            .output("pv", ParamType::ptr(ParamType::U8))
            .input("cb", ParamType::U32)
            .input("flags", ParamType::U32)
            .size_is("pv", "cb");
        assert!(matches!(sized_read(3, &extra), Err(BindError::OverrideShape { .. })));

        let in_out = MethodDescriptor::new("InOut")
            .in_out("pv", ParamType::ptr(ParamType::U8))
            .input("cb", ParamType::U32)
            .size_is("pv", "cb");
        assert!(matches!(sized_read(3, &in_out), Err(BindError::OverrideShape { .. })));
    }
}
