use super::{Heap, Value};

/// Nesting depth past which containers print as `…` instead of recursing.
const MAX_FORMAT_DEPTH: usize = 16;

/// The `str`/`print` form of a value.
pub fn display(heap: &Heap, v: Value) -> String {
    let mut out = String::new();
    write_value(heap, v, false, 0, &mut out);
    out
}

/// Like [`display`], but strings are quoted with internal quotes doubled.
pub fn repr(heap: &Heap, v: Value) -> String {
    let mut out = String::new();
    write_value(heap, v, true, 0, &mut out);
    out
}

fn write_value(heap: &Heap, v: Value, quoted: bool, depth: usize, out: &mut String) {
    if v.is_null() {
        out.push_str("null");
    } else if v.is_int() {
        out.push_str(&v.as_int().to_string());
    } else if v.is_double() {
        out.push_str(&format_number(v.as_double()));
    } else if let Some(s) = heap.as_str(v) {
        if quoted {
            out.push('"');
            out.push_str(&s.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&s);
        }
    } else if depth >= MAX_FORMAT_DEPTH {
        out.push('…');
    } else if let Some(items) = heap.list_items(v) {
        out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_value(heap, *item, true, depth + 1, out);
        }
        out.push(']');
    } else if v.is_map() {
        out.push('{');
        for (i, (key, value)) in heap.map_entries(v).into_iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_value(heap, key, true, depth + 1, out);
            out.push_str(": ");
            write_value(heap, value, true, depth + 1, out);
        }
        out.push('}');
    } else if let Some(index) = heap.funcref_index(v) {
        if heap.funcref_outer(v).is_null() {
            out.push_str(&format!("FuncRef({index})"));
        } else {
            out.push_str(&format!("FuncRef({index}, closure)"));
        }
    } else {
        out.push_str("<value>");
    }
}

/// Number formatting: integral values without a fraction, very large or
/// very small magnitudes in `E` notation, everything else with one to six
/// decimals.
pub fn format_number(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF".to_string() } else { "-INF".to_string() };
    }
    if d.fract() == 0.0 {
        let s = format!("{d:.0}");
        return if s == "-0" { "0".to_string() } else { s };
    }
    if d.abs() > 1e10 || d.abs() < 1e-6 {
        return format_exponent(d);
    }
    let fixed = format!("{d:.6}");
    let trimmed = fixed.trim_end_matches('0');
    let mut s = if trimmed.ends_with('.') { format!("{trimmed}0") } else { trimmed.to_string() };
    if s == "-0.0" {
        s = "0".to_string();
    }
    s
}

// Six-digit mantissa and a signed, zero-padded three-digit exponent, with
// "E-00" shortened to "E-0".
fn format_exponent(d: f64) -> String {
    let sci = format!("{d:.6e}");
    let Some((mantissa, exp)) = sci.split_once('e') else { return sci };
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let s = format!("{mantissa}E{sign}{:03}", exp.abs());
    s.replace("E-00", "E-0")
}

/// Parse a value as a number the way `val` does: integral results in i32
/// range come back as ints, anything unparseable as 0.
pub fn to_number(heap: &Heap, v: Value) -> Value {
    if v.is_number() {
        return v;
    }
    let Some(text) = heap.as_str(v) else { return Value::int(0) };
    match text.trim().parse::<f64>() {
        Ok(n) if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 => Value::int(n as i32),
        Ok(n) => Value::double(n),
        Err(_) => Value::int(0),
    }
}
