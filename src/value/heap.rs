use std::borrow::Cow;
use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use super::varmap::{RegisterFile, RegisterWindow};
use super::{Value, FUNCREF_TAG, ISA_KEY, LIST_TAG, MAP_TAG, STRING_TAG};
use crate::vm::{VmError, VmResult};

/// Longest `__isa` chain walked before giving up; guards against cycles.
pub const MAX_ISA_DEPTH: usize = 256;

// ── Heap objects ─────────────────────────────────────────────────────

pub(crate) enum Object {
    Str(String),
    List(ListObj),
    Map(MapObj),
    FuncRef(FuncRefObj),
}

pub(crate) struct ListObj {
    pub(crate) items: Vec<Value>,
    pub(crate) frozen: bool,
}

pub(crate) struct MapObj {
    pub(crate) entries: IndexMap<MapKey, (Value, Value)>,
    pub(crate) frozen: bool,
    /// Set while this map is the live variable map of a frame.
    pub(crate) window: Option<RegisterWindow>,
}

pub(crate) struct FuncRefObj {
    pub(crate) index: i32,
    pub(crate) outer: Value,
}

/// Hashable form of a map key. Numbers are keyed by value so `1` and
/// `1.0` land on the same entry; strings by content; heap containers by
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum MapKey {
    Null,
    Num(u64),
    Str(String),
    Ref(u64),
}

struct Slot {
    obj: Option<Object>,
    marked: bool,
}

/// Handle table backing every heap-tagged [`Value`], plus the register
/// arena the VM executes in. Live variable maps read and write through
/// the arena, which is why it lives here rather than on the VM.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub registers: RegisterFile,
    allocated_since_gc: usize,
}

impl Heap {
    pub fn new(register_count: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            registers: RegisterFile::new(register_count),
            allocated_since_gc: 0,
        }
    }

    fn alloc(&mut self, obj: Object) -> u32 {
        self.allocated_since_gc += 1;
        if let Some(h) = self.free.pop() {
            self.slots[h as usize] = Slot { obj: Some(obj), marked: false };
            h
        } else {
            self.slots.push(Slot { obj: Some(obj), marked: false });
            (self.slots.len() - 1) as u32
        }
    }

    pub(crate) fn object(&self, v: Value) -> Option<&Object> {
        if !v.is_heap() {
            return None;
        }
        self.slots.get(v.handle() as usize).and_then(|s| s.obj.as_ref())
    }

    pub(crate) fn object_mut(&mut self, v: Value) -> Option<&mut Object> {
        if !v.is_heap() {
            return None;
        }
        self.slots.get_mut(v.handle() as usize).and_then(|s| s.obj.as_mut())
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    // ── Strings ──

    /// Inline for short ASCII text, heap-backed otherwise.
    pub fn make_string(&mut self, s: &str) -> Value {
        if let Some(v) = Value::tiny_string(s) {
            return v;
        }
        let h = self.alloc(Object::Str(s.to_string()));
        Value::tagged(STRING_TAG, h)
    }

    pub fn make_string_owned(&mut self, s: String) -> Value {
        if let Some(v) = Value::tiny_string(&s) {
            return v;
        }
        let h = self.alloc(Object::Str(s));
        Value::tagged(STRING_TAG, h)
    }

    /// Text of a string value, or `None` for non-strings.
    pub fn as_str(&self, v: Value) -> Option<Cow<'_, str>> {
        if v.is_tiny_string() {
            let bytes = v.tiny_bytes();
            let text: String = bytes[..v.tiny_len()].iter().map(|b| *b as char).collect();
            return Some(Cow::Owned(text));
        }
        match self.object(v) {
            Some(Object::Str(s)) => Some(Cow::Borrowed(s.as_str())),
            _ => None,
        }
    }

    /// Length in characters.
    pub fn string_len(&self, v: Value) -> usize {
        if v.is_tiny_string() {
            return v.tiny_len();
        }
        match self.object(v) {
            Some(Object::Str(s)) => s.chars().count(),
            _ => 0,
        }
    }

    pub fn substring(&mut self, v: Value, start: usize, len: usize) -> Value {
        let piece: String = match self.as_str(v) {
            Some(s) => s.chars().skip(start).take(len).collect(),
            None => String::new(),
        };
        self.make_string_owned(piece)
    }

    pub fn string_slice(&mut self, v: Value, start: i64, end: i64) -> Value {
        let len = self.string_len(v);
        let (start, end) = clamp_range(start, end, len);
        self.substring(v, start, end - start)
    }

    pub fn string_eq(&self, a: Value, b: Value) -> bool {
        if a.identical(b) {
            return true;
        }
        match (self.as_str(a), self.as_str(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    // ── Lists ──

    pub fn make_list(&mut self, capacity: usize) -> Value {
        self.make_list_from(Vec::with_capacity(capacity))
    }

    pub fn make_list_from(&mut self, items: Vec<Value>) -> Value {
        let h = self.alloc(Object::List(ListObj { items, frozen: false }));
        Value::tagged(LIST_TAG, h)
    }

    pub fn list_items(&self, v: Value) -> Option<&[Value]> {
        match self.object(v) {
            Some(Object::List(l)) => Some(&l.items),
            _ => None,
        }
    }

    fn list_mut(&mut self, v: Value) -> VmResult<Option<&mut ListObj>> {
        match self.object_mut(v) {
            Some(Object::List(l)) if l.frozen => Err(VmError::FrozenList),
            Some(Object::List(l)) => Ok(Some(l)),
            _ => Ok(None),
        }
    }

    pub fn list_count(&self, v: Value) -> usize {
        self.list_items(v).map_or(0, |items| items.len())
    }

    pub fn list_push(&mut self, list: Value, item: Value) -> VmResult<()> {
        if let Some(l) = self.list_mut(list)? {
            l.items.push(item);
        }
        Ok(())
    }

    /// Element at `index`; negative indices count from the end.
    pub fn list_get(&self, list: Value, index: i64) -> Option<Value> {
        let items = self.list_items(list)?;
        let i = resolve_index(index, items.len())?;
        Some(items[i])
    }

    pub fn list_set(&mut self, list: Value, index: i64, item: Value) -> VmResult<()> {
        let Some(l) = self.list_mut(list)? else { return Ok(()) };
        match resolve_index(index, l.items.len()) {
            Some(i) => {
                l.items[i] = item;
                Ok(())
            }
            None => Err(VmError::IndexOutOfRange { kind: "list", index }),
        }
    }

    /// Removes the element at `index`; false when out of range.
    pub fn list_remove(&mut self, list: Value, index: i64) -> VmResult<bool> {
        let Some(l) = self.list_mut(list)? else { return Ok(false) };
        match resolve_index(index, l.items.len()) {
            Some(i) => {
                l.items.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn list_slice(&mut self, list: Value, start: i64, end: i64) -> Value {
        let items = match self.list_items(list) {
            Some(items) => {
                let (s, e) = clamp_range(start, end, items.len());
                items[s..e].to_vec()
            }
            None => Vec::new(),
        };
        self.make_list_from(items)
    }

    // ── Maps ──

    pub fn make_map(&mut self, capacity: usize) -> Value {
        let h = self.alloc(Object::Map(MapObj {
            entries: IndexMap::with_capacity(capacity),
            frozen: false,
            window: None,
        }));
        Value::tagged(MAP_TAG, h)
    }

    pub(crate) fn make_map_with_window(&mut self, window: RegisterWindow) -> Value {
        let h = self.alloc(Object::Map(MapObj {
            entries: IndexMap::new(),
            frozen: false,
            window: Some(window),
        }));
        Value::tagged(MAP_TAG, h)
    }

    pub(crate) fn key_of(&self, key: Value) -> MapKey {
        if key.is_null() {
            MapKey::Null
        } else if let Some(n) = key.as_number() {
            let n = if n == 0.0 { 0.0 } else { n };
            MapKey::Num(Value::double(n).bits())
        } else if let Some(s) = self.as_str(key) {
            MapKey::Str(s.into_owned())
        } else {
            MapKey::Ref(key.bits())
        }
    }

    pub(crate) fn map_obj(&self, v: Value) -> Option<&MapObj> {
        match self.object(v) {
            Some(Object::Map(m)) => Some(m),
            _ => None,
        }
    }

    fn map_obj_mut(&mut self, v: Value) -> Option<&mut MapObj> {
        match self.object_mut(v) {
            Some(Object::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Direct lookup without raising and without walking `__isa`.
    pub fn map_try_get(&self, map: Value, key: Value) -> Option<Value> {
        let m = self.map_obj(map)?;
        if let Some(window) = m.window {
            if let Some(reg) = self.window_find(window, key) {
                return Some(self.registers.values[reg]);
            }
        }
        m.entries.get(&self.key_of(key)).map(|(_, v)| *v)
    }

    pub fn map_has_key(&self, map: Value, key: Value) -> bool {
        self.map_try_get(map, key).is_some()
    }

    pub fn map_set(&mut self, map: Value, key: Value, value: Value) -> VmResult<()> {
        let Some(m) = self.map_obj(map) else { return Ok(()) };
        if m.frozen {
            return Err(VmError::FrozenMap);
        }
        if let Some(window) = m.window {
            if let Some(reg) = self.window_find(window, key) {
                self.registers.values[reg] = value;
                return Ok(());
            }
        }
        let k = self.key_of(key);
        if let Some(m) = self.map_obj_mut(map) {
            m.entries.insert(k, (key, value));
        }
        Ok(())
    }

    /// Removes `key`; false when it was not present.
    pub fn map_remove(&mut self, map: Value, key: Value) -> VmResult<bool> {
        let Some(m) = self.map_obj(map) else { return Ok(false) };
        if m.frozen {
            return Err(VmError::FrozenMap);
        }
        let mut removed = false;
        if let Some(window) = m.window {
            if let Some(reg) = self.window_find(window, key) {
                self.registers.names[reg] = Value::NULL;
                removed = true;
            }
        }
        let k = self.key_of(key);
        let stored = self.map_obj_mut(map).is_some_and(|m| m.entries.shift_remove(&k).is_some());
        Ok(removed || stored)
    }

    /// Stored entries not shadowed by a bound register of `window`.
    fn unshadowed_entries<'a>(
        &'a self,
        m: &'a MapObj,
        window: RegisterWindow,
    ) -> impl Iterator<Item = (Value, Value)> + 'a {
        m.entries.values().filter(move |(k, _)| self.window_find(window, *k).is_none()).copied()
    }

    pub fn map_count(&self, map: Value) -> usize {
        let Some(m) = self.map_obj(map) else { return 0 };
        match m.window {
            None => m.entries.len(),
            Some(window) => {
                window.bound_registers(&self.registers).count() + self.unshadowed_entries(m, window).count()
            }
        }
    }

    /// All entries in iteration order: live register variables first, then
    /// stored entries not shadowed by one of them.
    pub fn map_entries(&self, map: Value) -> Vec<(Value, Value)> {
        let Some(m) = self.map_obj(map) else { return Vec::new() };
        let Some(window) = m.window else {
            return m.entries.values().copied().collect();
        };
        let live = window.bound_registers(&self.registers).map(|r| (self.registers.names[r], self.registers.values[r]));
        live.chain(self.unshadowed_entries(m, window)).collect()
    }

    /// Entry `n` in [`Heap::map_entries`] order. Captured maps index their
    /// storage directly.
    pub fn map_entry_at(&self, map: Value, n: usize) -> Option<(Value, Value)> {
        let m = self.map_obj(map)?;
        let Some(window) = m.window else {
            return m.entries.get_index(n).map(|(_, entry)| *entry);
        };
        let mut bound = 0;
        for reg in window.bound_registers(&self.registers) {
            if bound == n {
                return Some((self.registers.names[reg], self.registers.values[reg]));
            }
            bound += 1;
        }
        self.unshadowed_entries(m, window).nth(n - bound)
    }

    /// Lookup that follows the `__isa` chain.
    pub fn map_lookup(&self, map: Value, key: Value) -> Option<Value> {
        self.map_lookup_with_origin(map, key).map(|(v, _)| v)
    }

    /// Like [`Heap::map_lookup`], also returning the `__isa` of the map the
    /// key was found in (the `super` for a method found there).
    pub fn map_lookup_with_origin(&self, map: Value, key: Value) -> Option<(Value, Value)> {
        let mut current = map;
        for _ in 0..MAX_ISA_DEPTH {
            if !current.is_map() {
                return None;
            }
            let parent = self.map_try_get(current, ISA_KEY);
            if let Some(v) = self.map_try_get(current, key) {
                return Some((v, parent.unwrap_or(Value::NULL)));
            }
            current = parent?;
        }
        None
    }

    /// True when `proto` appears on `v`'s `__isa` chain.
    pub fn isa_chain_contains(&self, v: Value, proto: Value) -> bool {
        let mut current = v;
        for _ in 0..MAX_ISA_DEPTH {
            match self.map_try_get(current, ISA_KEY) {
                Some(next) if next.identical(proto) => return true,
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    // ── Function references ──

    pub fn make_funcref(&mut self, index: i32, outer: Value) -> Value {
        let h = self.alloc(Object::FuncRef(FuncRefObj { index, outer }));
        Value::tagged(FUNCREF_TAG, h)
    }

    pub fn funcref_index(&self, v: Value) -> Option<i32> {
        match self.object(v) {
            Some(Object::FuncRef(f)) => Some(f.index),
            _ => None,
        }
    }

    /// Captured closure environment, or null.
    pub fn funcref_outer(&self, v: Value) -> Value {
        match self.object(v) {
            Some(Object::FuncRef(f)) => f.outer,
            _ => Value::NULL,
        }
    }

    // ── Frozen values ──

    pub fn is_frozen(&self, v: Value) -> bool {
        match self.object(v) {
            Some(Object::List(l)) => l.frozen,
            Some(Object::Map(m)) => m.frozen,
            _ => false,
        }
    }

    /// Freezes `v` and every list or map reachable from it.
    pub fn freeze(&mut self, v: Value) {
        let mut work = vec![v];
        while let Some(v) = work.pop() {
            let children = match self.object_mut(v) {
                Some(Object::List(l)) if !l.frozen => {
                    l.frozen = true;
                    l.items.clone()
                }
                Some(Object::Map(m)) if !m.frozen => {
                    m.frozen = true;
                    m.entries.values().flat_map(|(k, v)| [*k, *v]).collect()
                }
                _ => continue,
            };
            if let Some(Object::Map(m)) = self.object(v) {
                if m.window.is_some() {
                    work.extend(self.map_entries(v).into_iter().map(|(_, val)| val));
                }
            }
            work.extend(children);
        }
    }

    /// Deep copy of `v` with every list and map frozen. Scalars, strings
    /// and funcrefs are returned unchanged.
    pub fn frozen_copy(&mut self, v: Value) -> Value {
        let mut copied = HashMap::new();
        self.frozen_copy_inner(v, &mut copied)
    }

    fn frozen_copy_inner(&mut self, v: Value, copied: &mut HashMap<u64, Value>) -> Value {
        if let Some(done) = copied.get(&v.bits()) {
            return *done;
        }
        if v.is_list() {
            let items = self.list_items(v).map(<[Value]>::to_vec).unwrap_or_default();
            let copy = self.make_list(items.len());
            copied.insert(v.bits(), copy);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(self.frozen_copy_inner(item, copied));
            }
            if let Some(Object::List(l)) = self.object_mut(copy) {
                l.items = out;
                l.frozen = true;
            }
            copy
        } else if v.is_map() {
            let entries = self.map_entries(v);
            let copy = self.make_map(entries.len());
            copied.insert(v.bits(), copy);
            for (key, value) in entries {
                let key = self.frozen_copy_inner(key, copied);
                let value = self.frozen_copy_inner(value, copied);
                let k = self.key_of(key);
                if let Some(m) = self.map_obj_mut(copy) {
                    m.entries.insert(k, (key, value));
                }
            }
            if let Some(m) = self.map_obj_mut(copy) {
                m.frozen = true;
            }
            copy
        } else {
            v
        }
    }

    // ── Garbage collection ──

    /// Mark from the register arena plus `roots`, then free everything
    /// unmarked. Returns the number of objects freed.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        let mut work: Vec<Value> = Vec::with_capacity(roots.len() + 64);
        work.extend(self.registers.values.iter().copied().filter(|v| v.is_heap()));
        work.extend(self.registers.names.iter().copied().filter(|v| v.is_heap()));
        work.extend(roots.iter().copied().filter(|v| v.is_heap()));

        while let Some(v) = work.pop() {
            let Some(slot) = self.slots.get_mut(v.handle() as usize) else { continue };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            match &slot.obj {
                Some(Object::List(l)) => work.extend(l.items.iter().copied().filter(|v| v.is_heap())),
                Some(Object::Map(m)) => {
                    for (k, v) in m.entries.values() {
                        work.extend([*k, *v].into_iter().filter(|v| v.is_heap()));
                    }
                }
                Some(Object::FuncRef(f)) if f.outer.is_heap() => work.push(f.outer),
                _ => {}
            }
        }

        let mut freed = 0;
        for (h, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked {
                slot.marked = false;
            } else if slot.obj.is_some() {
                slot.obj = None;
                self.free.push(h as u32);
                freed += 1;
            }
        }
        self.allocated_since_gc = 0;
        debug!(freed, live = self.live_objects(), "heap collected");
        freed
    }
}

/// Index into a sequence of `len`, counting negative indices from the end.
pub(crate) fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let i = if index < 0 { index + len as i64 } else { index };
    (i >= 0 && (i as usize) < len).then_some(i as usize)
}

/// Half-open slice bounds with negative indices from the end, clamped to
/// `[0, len]`; an inverted range becomes empty.
pub(crate) fn clamp_range(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let fix = |i: i64| -> usize {
        let i = if i < 0 { i + len_i } else { i };
        i.clamp(0, len_i) as usize
    };
    let (s, e) = (fix(start), fix(end));
    if s >= e { (s, s) } else { (s, e) }
}
