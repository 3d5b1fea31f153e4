use super::format::display;
use super::{Heap, Value};
use crate::vm::{VmError, VmResult};

/// Depth past which container equality falls back to identity.
const MAX_EQUAL_DEPTH: usize = 16;

/// Longest string, in bytes, that string replication may build.
pub const MAX_STRING_LEN: usize = 1 << 24;

#[inline]
fn from_i64(r: i64) -> Value {
    match i32::try_from(r) {
        Ok(i) => Value::int(i),
        Err(_) => Value::double(r as f64),
    }
}

// ── Arithmetic ───────────────────────────────────────────────────────

pub fn add(heap: &mut Heap, a: Value, b: Value) -> Value {
    if a.is_int() && b.is_int() {
        return from_i64(a.as_int() as i64 + b.as_int() as i64);
    }
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Value::double(x + y);
    }
    if a.is_string() || b.is_string() {
        let mut s = display(heap, a);
        s.push_str(&display(heap, b));
        return heap.make_string_owned(s);
    }
    Value::NULL
}

pub fn sub(heap: &mut Heap, a: Value, b: Value) -> Value {
    if a.is_int() && b.is_int() {
        return from_i64(a.as_int() as i64 - b.as_int() as i64);
    }
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Value::double(x - y);
    }
    if a.is_string() && b.is_string() {
        let stripped = match (heap.as_str(a), heap.as_str(b)) {
            (Some(sa), Some(sb)) if !sb.is_empty() => sa.strip_suffix(sb.as_ref()).map(str::to_string),
            _ => None,
        };
        return match stripped {
            Some(rest) => heap.make_string_owned(rest),
            None => a,
        };
    }
    Value::NULL
}

pub fn mult(heap: &mut Heap, a: Value, b: Value) -> VmResult<Value> {
    if a.is_int() && b.is_int() {
        return Ok(from_i64(a.as_int() as i64 * b.as_int() as i64));
    }
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(Value::double(x * y));
    }
    if a.is_string() && b.is_int() {
        let count = b.as_int();
        if count <= 0 {
            return Ok(heap.make_string(""));
        }
        if count == 1 {
            return Ok(a);
        }
        let s = heap.as_str(a).map(|s| s.into_owned()).unwrap_or_default();
        if s.len().checked_mul(count as usize).is_none_or(|n| n > MAX_STRING_LEN) {
            return Err(VmError::StringTooLong);
        }
        return Ok(heap.make_string_owned(s.repeat(count as usize)));
    }
    if a.is_string() && b.is_double() {
        let factor = b.as_double();
        if !factor.is_finite() {
            return Ok(Value::NULL);
        }
        if factor <= 0.0 {
            return Ok(heap.make_string(""));
        }
        let s = heap.as_str(a).map(|s| s.into_owned()).unwrap_or_default();
        if s.len() as f64 * factor > MAX_STRING_LEN as f64 {
            return Err(VmError::StringTooLong);
        }
        let repeats = factor as usize;
        let extra = (s.chars().count() as f64 * (factor - repeats as f64)) as usize;
        let mut out = s.repeat(repeats);
        out.extend(s.chars().take(extra));
        return Ok(heap.make_string_owned(out));
    }
    Ok(Value::NULL)
}

/// Division always yields a double for numbers.
pub fn div(heap: &mut Heap, a: Value, b: Value) -> VmResult<Value> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(Value::double(x / y));
    }
    if a.is_string() && b.is_number() {
        let inverse = div(heap, Value::double(1.0), b)?;
        return mult(heap, a, inverse);
    }
    Ok(Value::NULL)
}

pub fn modulo(a: Value, b: Value) -> Value {
    if a.is_int() && b.is_int() {
        if b.as_int() == 0 {
            return Value::NULL;
        }
        return from_i64(a.as_int() as i64 % b.as_int() as i64);
    }
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Value::double(x % y);
    }
    Value::NULL
}

// ── Fuzzy logic ──────────────────────────────────────────────────────

pub fn to_fuzzy_bool(heap: &Heap, v: Value) -> f64 {
    match v.as_number() {
        Some(n) => n,
        None if is_truthy(heap, v) => 1.0,
        None => 0.0,
    }
}

#[inline]
fn abs_clamp01(d: f64) -> f64 {
    d.abs().min(1.0)
}

pub fn and(heap: &Heap, a: Value, b: Value) -> Value {
    let (fa, fb) = (to_fuzzy_bool(heap, a), to_fuzzy_bool(heap, b));
    Value::double(abs_clamp01(fa * fb))
}

pub fn or(heap: &Heap, a: Value, b: Value) -> Value {
    let (fa, fb) = (to_fuzzy_bool(heap, a), to_fuzzy_bool(heap, b));
    Value::double(abs_clamp01(fa + fb - fa * fb))
}

pub fn not(heap: &Heap, a: Value) -> Value {
    Value::double(1.0 - abs_clamp01(to_fuzzy_bool(heap, a)))
}

// ── Comparison ───────────────────────────────────────────────────────

pub fn lt(heap: &Heap, a: Value, b: Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x < y;
    }
    match (heap.as_str(a), heap.as_str(b)) {
        (Some(x), Some(y)) => x < y,
        _ => false,
    }
}

pub fn le(heap: &Heap, a: Value, b: Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x <= y;
    }
    match (heap.as_str(a), heap.as_str(b)) {
        (Some(x), Some(y)) => x <= y,
        _ => false,
    }
}

/// Semantic equality: numbers across int/double, strings by content,
/// lists and maps by content. Null equals only null.
pub fn equal(heap: &Heap, a: Value, b: Value) -> bool {
    equal_at(heap, a, b, 0)
}

fn equal_at(heap: &Heap, a: Value, b: Value, depth: usize) -> bool {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x == y;
    }
    if a.identical(b) {
        return true;
    }
    if a.is_string() && b.is_string() {
        return heap.string_eq(a, b);
    }
    if a.is_null() || b.is_null() || depth >= MAX_EQUAL_DEPTH {
        return false;
    }
    if let (Some(xs), Some(ys)) = (heap.list_items(a), heap.list_items(b)) {
        return xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| equal_at(heap, *x, *y, depth + 1));
    }
    if a.is_map() && b.is_map() {
        let entries = heap.map_entries(a);
        if entries.len() != heap.map_count(b) {
            return false;
        }
        return entries.into_iter().all(|(k, v)| match heap.map_try_get(b, k) {
            Some(other) => equal_at(heap, v, other, depth + 1),
            None => false,
        });
    }
    false
}

pub fn is_truthy(heap: &Heap, v: Value) -> bool {
    if v.is_null() {
        false
    } else if v.is_int() {
        v.as_int() != 0
    } else if v.is_double() {
        v.as_double() != 0.0
    } else if v.is_string() {
        heap.string_len(v) != 0
    } else {
        true
    }
}
