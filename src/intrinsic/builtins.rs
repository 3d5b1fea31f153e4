use super::Intrinsic;
use crate::value::{format, Value};
use crate::vm::VmError;

/// The intrinsics every VM registers on reset, in table order.
pub fn core_intrinsics() -> Vec<Intrinsic> {
    vec![
        Intrinsic::new("print").param_default("s", "").code(|cx| {
            let line = cx.display(cx.arg(0));
            cx.print(&line);
            Ok(Value::NULL)
        }),
        Intrinsic::new("input").param("prompt").code(|cx| {
            let prompt = cx.arg(0);
            let prompt = if prompt.is_null() { String::new() } else { cx.display(prompt) };
            let line = cx.input(&prompt)?;
            Ok(cx.heap.make_string_owned(line))
        }),
        Intrinsic::new("val").param("x").code(|cx| Ok(format::to_number(cx.heap, cx.arg(0)))),
        Intrinsic::new("str").param("x").code(|cx| {
            let text = cx.display(cx.arg(0));
            Ok(cx.heap.make_string_owned(text))
        }),
        Intrinsic::new("len").param("x").code(|cx| {
            let x = cx.arg(0);
            let n = if x.is_list() {
                cx.heap.list_count(x)
            } else if x.is_string() {
                cx.heap.string_len(x)
            } else if x.is_map() {
                cx.heap.map_count(x)
            } else {
                return Ok(Value::NULL);
            };
            Ok(Value::int(n as i32))
        }),
        Intrinsic::new("remove").param("self").param("index").code(|cx| {
            let (container, index) = (cx.arg(0), cx.arg(1));
            let removed = if container.is_list() {
                let i = index.as_number().map_or(0, |n| n as i64);
                cx.heap.list_remove(container, i)?
            } else if container.is_map() {
                cx.heap.map_remove(container, index)?
            } else {
                return Err(VmError::Native("remove must be called on list or map".to_string()));
            };
            Ok(Value::int(removed as i32))
        }),
        Intrinsic::new("freeze").param("x").code(|cx| {
            let x = cx.arg(0);
            cx.heap.freeze(x);
            Ok(Value::NULL)
        }),
        Intrinsic::new("isFrozen").param("x").code(|cx| Ok(Value::int(cx.heap.is_frozen(cx.arg(0)) as i32))),
        Intrinsic::new("frozenCopy").param("x").code(|cx| {
            let x = cx.arg(0);
            Ok(cx.heap.frozen_copy(x))
        }),
    ]
}
