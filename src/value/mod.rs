pub mod format;
pub mod heap;
pub mod ops;
pub mod varmap;

pub use heap::Heap;
pub use varmap::RegisterFile;

use std::fmt;

// ── NaN-boxed value ──────────────────────────────────────────────────
//
// Every value is one Copy u64. Anything whose top 16 bits sort below
// NULL_VALUE is an IEEE 754 double; the reserved patterns above it carry
// a type tag in the top 16 bits and a payload in the low 48.
//
//   0xFFF1  null
//   0xFFFA  int        low 32 bits: i32
//   0xFFFB  funcref    low 32 bits: heap handle
//   0xFFFC  map        low 32 bits: heap handle
//   0xFFFD  list       low 32 bits: heap handle
//   0xFFFE  string     low 32 bits: heap handle
//   0xFFFF  tiny str   bits 0..8: length, bits 8..48: up to 5 ASCII bytes

pub const NANISH_MASK: u64 = 0xFFFF_0000_0000_0000;
pub const NULL_VALUE: u64 = 0xFFF1_0000_0000_0000;
pub const INTEGER_TAG: u64 = 0xFFFA_0000_0000_0000;
pub const FUNCREF_TAG: u64 = 0xFFFB_0000_0000_0000;
pub const MAP_TAG: u64 = 0xFFFC_0000_0000_0000;
pub const LIST_TAG: u64 = 0xFFFD_0000_0000_0000;
pub const STRING_TAG: u64 = 0xFFFE_0000_0000_0000;
pub const TINY_STRING_TAG: u64 = 0xFFFF_0000_0000_0000;

const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;
const HANDLE_MASK: u64 = 0x0000_0000_FFFF_FFFF;

/// Longest string that is stored inline instead of on the heap.
pub const TINY_STRING_MAX: usize = 5;

// Well-known names, all short enough to be inline strings.
pub const ISA_KEY: Value = Value(0xFFFF_6173_695F_5F05); // "__isa"
pub const SELF_NAME: Value = Value(0xFFFF_0066_6C65_7304); // "self"
pub const SUPER_NAME: Value = Value(0xFFFF_7265_7075_7305); // "super"
pub const KEY_NAME: Value = Value(0xFFFF_0000_7965_6B03); // "key"
pub const VALUE_NAME: Value = Value(0xFFFF_6575_6C61_7605); // "value"

/// A NaN-boxed MiniScript value.
///
/// `==` on `Value` is bit identity (`value_identical`). Semantic equality,
/// which compares strings by content and numbers across int/double, needs
/// the heap and lives in [`ops::equal`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const NULL: Value = Value(NULL_VALUE);

    #[inline]
    pub const fn null() -> Self {
        Value(NULL_VALUE)
    }

    #[inline]
    pub const fn int(i: i32) -> Self {
        Value(INTEGER_TAG | (i as u32 as u64))
    }

    #[inline]
    pub fn double(d: f64) -> Self {
        if d.is_nan() {
            Value(CANONICAL_NAN) // keeps every NaN out of the tag space
        } else {
            Value(d.to_bits())
        }
    }

    /// Int when `n` fits losslessly in an i32, double otherwise.
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 && !(n == 0.0 && n.is_sign_negative()) {
            Value::int(n as i32)
        } else {
            Value::double(n)
        }
    }

    /// Inline string, or `None` when `s` is too long or not pure ASCII.
    pub fn tiny_string(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() > TINY_STRING_MAX || !s.is_ascii() {
            return None;
        }
        let mut bits = TINY_STRING_TAG | bytes.len() as u64;
        for (i, b) in bytes.iter().enumerate() {
            bits |= (*b as u64) << (8 * (i + 1));
        }
        Some(Value(bits))
    }

    #[inline]
    pub(crate) const fn tagged(tag: u64, handle: u32) -> Self {
        Value(tag | handle as u64)
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    fn tag(self) -> u64 {
        self.0 & NANISH_MASK
    }

    // ── Predicates ──

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == NULL_VALUE
    }

    #[inline]
    pub fn is_int(self) -> bool {
        self.tag() == INTEGER_TAG
    }

    #[inline]
    pub fn is_double(self) -> bool {
        self.tag() < NULL_VALUE
    }

    #[inline]
    pub fn is_number(self) -> bool {
        self.is_int() || self.is_double()
    }

    #[inline]
    pub fn is_string(self) -> bool {
        (self.0 & STRING_TAG) == STRING_TAG
    }

    #[inline]
    pub fn is_tiny_string(self) -> bool {
        self.tag() == TINY_STRING_TAG
    }

    #[inline]
    pub fn is_heap_string(self) -> bool {
        self.tag() == STRING_TAG
    }

    #[inline]
    pub fn is_list(self) -> bool {
        self.tag() == LIST_TAG
    }

    #[inline]
    pub fn is_map(self) -> bool {
        self.tag() == MAP_TAG
    }

    #[inline]
    pub fn is_funcref(self) -> bool {
        self.tag() == FUNCREF_TAG
    }

    /// True for every variant that refers to a heap object.
    #[inline]
    pub fn is_heap(self) -> bool {
        matches!(self.tag(), FUNCREF_TAG | MAP_TAG | LIST_TAG | STRING_TAG)
    }

    // ── Accessors ──

    #[inline]
    pub fn as_int(self) -> i32 {
        (self.0 & HANDLE_MASK) as u32 as i32
    }

    #[inline]
    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Numeric value of an int or double.
    #[inline]
    pub fn as_number(self) -> Option<f64> {
        if self.is_int() {
            Some(self.as_int() as f64)
        } else if self.is_double() {
            Some(self.as_double())
        } else {
            None
        }
    }

    #[inline]
    pub fn handle(self) -> u32 {
        (self.0 & HANDLE_MASK) as u32
    }

    pub(crate) fn tiny_len(self) -> usize {
        (self.0 & 0xFF) as usize
    }

    /// Bytes of an inline string; the slice length is `tiny_len`.
    pub(crate) fn tiny_bytes(self) -> [u8; TINY_STRING_MAX] {
        let mut out = [0u8; TINY_STRING_MAX];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (self.0 >> (8 * (i + 1))) as u8;
        }
        out
    }

    #[inline]
    pub fn identical(self, other: Value) -> bool {
        self.0 == other.0
    }

    pub fn type_name(self) -> &'static str {
        match self.tag() {
            _ if self.is_double() => "number",
            INTEGER_TAG => "number",
            FUNCREF_TAG => "funcRef",
            MAP_TAG => "map",
            LIST_TAG => "list",
            STRING_TAG | TINY_STRING_TAG => "string",
            _ => "null",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::double(d)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Null")
        } else if self.is_int() {
            write!(f, "Int({})", self.as_int())
        } else if self.is_double() {
            write!(f, "Double({})", self.as_double())
        } else if self.is_tiny_string() {
            let bytes = self.tiny_bytes();
            let s = String::from_utf8_lossy(&bytes[..self.tiny_len()]);
            write!(f, "Tiny({s:?})")
        } else {
            write!(f, "{}#{}", self.type_name(), self.handle())
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
