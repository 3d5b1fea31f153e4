// ── Instruction dispatch ─────────────────────────────────────────────
//
// One `step` executes one instruction. Registers are addressed relative
// to `self.base`; frames are sized at reset so every register operand of
// the running function lies inside the arena.

use tracing::{debug, trace, warn};

use super::{CallInfo, Vm, VmError, VmResult};
use crate::bytecode::{self, Opcode};
use crate::intrinsic::IntrinsicCall;
use crate::value::heap::resolve_index;
use crate::value::{ops, Heap, Value, ISA_KEY, KEY_NAME, SELF_NAME, SUPER_NAME, VALUE_NAME};

/// Where a call lands and how its result travels back.
struct CallSite {
    func: usize,
    outer: Value,
    callee_base: usize,
    /// Arguments already written to the callee's parameter registers.
    /// `None` skips frame setup entirely (`CALLF`).
    bound_args: Option<usize>,
    result_reg: Option<u8>,
    return_pc: usize,
}

type Arith = fn(&mut Heap, Value, Value) -> Value;
type Compare = fn(&Heap, Value, Value) -> bool;

impl Vm {
    #[inline(always)]
    fn reg(&self, r: u8) -> Value {
        self.heap.registers.values[self.base + r as usize]
    }

    #[inline(always)]
    fn set_reg(&mut self, r: u8, v: Value) {
        self.heap.registers.values[self.base + r as usize] = v;
    }

    #[inline(always)]
    fn set_name(&mut self, r: u8, name: Value) {
        self.heap.registers.names[self.base + r as usize] = name;
    }

    fn constant(&self, index: usize) -> VmResult<Value> {
        self.functions[self.func].constants.get(index).copied().ok_or(VmError::BadConstant { index })
    }

    fn jump(&mut self, offset: i32) -> VmResult<()> {
        let target = self.pc as i64 + offset as i64;
        if target < 0 {
            return Err(VmError::PcOutOfBounds);
        }
        self.pc = target as usize;
        Ok(())
    }

    fn arith(&mut self, a: u8, b: u8, c: u8, f: Arith) {
        let (x, y) = (self.reg(b), self.reg(c));
        let v = f(&mut self.heap, x, y);
        self.set_reg(a, v);
    }

    fn test(&self, x: Value, y: Value, f: Compare) -> bool {
        f(&self.heap, x, y)
    }

    fn store_test(&mut self, a: u8, x: Value, y: Value, f: Compare) {
        let v = Value::int(self.test(x, y, f) as i32);
        self.set_reg(a, v);
    }

    fn branch_if(&mut self, cond: bool, offset: i32) -> VmResult<()> {
        if cond { self.jump(offset) } else { Ok(()) }
    }

    fn skip_unless(&mut self, cond: bool) {
        if !cond {
            self.pc += 1;
        }
    }

    /// Execute one instruction. `Some(result)` once the entry frame returns.
    pub(super) fn step(&mut self) -> VmResult<Option<Value>> {
        let func = &self.functions[self.func];
        let Some(&word) = func.code.get(self.pc) else {
            return Err(VmError::PcOutOfBounds);
        };
        trace!(function = %func.name, pc = self.pc, instruction = %bytecode::disassemble(word));
        self.pc += 1;

        let Some(op) = Opcode::from_u8(bytecode::op(word)) else {
            return Err(VmError::UnknownOpcode { op: bytecode::op(word) });
        };
        let (a, b, c) = (bytecode::a(word), bytecode::b(word), bytecode::c(word));
        let int = |i: i32| Value::int(i);

        match op {
            Opcode::NOOP => {}

            // ── Loads and names ──
            Opcode::LOAD_rA_rB => self.set_reg(a, self.reg(b)),
            Opcode::LOAD_rA_iBC => self.set_reg(a, int(bytecode::bc_s(word) as i32)),
            Opcode::LOAD_rA_kBC => {
                let k = self.constant(bytecode::bc_u(word) as usize)?;
                self.set_reg(a, k);
            }
            Opcode::LOADNULL_rA => self.set_reg(a, Value::NULL),
            Opcode::LOADV_rA_rB_kC => {
                let v = self.load_named(b, c)?;
                self.set_reg(a, v);
            }
            Opcode::LOADC_rA_rB_kC => {
                let v = self.load_named(b, c)?;
                if v.is_funcref() {
                    let callee_base = self.base + self.functions[self.func].max_regs as usize;
                    self.call_value(v, callee_base, a)?;
                } else {
                    self.set_reg(a, v);
                }
            }
            Opcode::FUNCREF_iA_iBC => {
                let locals = self.frame_locals();
                let f = self.heap.make_funcref(bytecode::bc_s(word) as i32, locals);
                self.set_reg(a, f);
            }
            Opcode::ASSIGN_rA_rB_kC => {
                let name = self.constant(c as usize)?;
                self.set_reg(a, self.reg(b));
                self.set_name(a, name);
            }
            Opcode::NAME_rA_kBC => {
                let name = self.constant(bytecode::bc_u(word) as usize)?;
                self.set_name(a, name);
            }

            // ── Arithmetic and logic ──
            Opcode::ADD_rA_rB_rC => self.arith(a, b, c, ops::add),
            Opcode::SUB_rA_rB_rC => self.arith(a, b, c, ops::sub),
            Opcode::MULT_rA_rB_rC => {
                let (x, y) = (self.reg(b), self.reg(c));
                let v = ops::mult(&mut self.heap, x, y)?;
                self.set_reg(a, v);
            }
            Opcode::DIV_rA_rB_rC => {
                let (x, y) = (self.reg(b), self.reg(c));
                let v = ops::div(&mut self.heap, x, y)?;
                self.set_reg(a, v);
            }
            Opcode::MOD_rA_rB_rC => self.set_reg(a, ops::modulo(self.reg(b), self.reg(c))),
            Opcode::AND_rA_rB_rC => self.set_reg(a, ops::and(&self.heap, self.reg(b), self.reg(c))),
            Opcode::OR_rA_rB_rC => self.set_reg(a, ops::or(&self.heap, self.reg(b), self.reg(c))),
            Opcode::NOT_rA_rB => self.set_reg(a, ops::not(&self.heap, self.reg(b))),

            // ── Containers ──
            Opcode::LIST_rA_iBC => {
                let l = self.heap.make_list(bytecode::bc_s(word).max(0) as usize);
                self.set_reg(a, l);
            }
            Opcode::MAP_rA_iBC => {
                let m = self.heap.make_map(bytecode::bc_s(word).max(0) as usize);
                self.set_reg(a, m);
            }
            Opcode::PUSH_rA_rB => {
                let (list, item) = (self.reg(a), self.reg(b));
                self.heap.list_push(list, item)?;
            }
            Opcode::INDEX_rA_rB_rC => {
                let v = self.index_value(self.reg(b), self.reg(c))?;
                self.set_reg(a, v);
            }
            Opcode::IDXSET_rA_rB_rC => self.set_index(self.reg(a), self.reg(b), self.reg(c))?,
            Opcode::SLICE_rA_rB_rC => {
                let end = self.heap.registers.values[self.base + c as usize + 1];
                let v = self.slice(self.reg(b), self.reg(c), end)?;
                self.set_reg(a, v);
            }
            Opcode::LOCALS_rA => {
                let locals = self.frame_locals();
                self.set_reg(a, locals);
                self.set_name(a, Value::NULL);
            }
            Opcode::OUTER_rA => {
                let outer = self.call_stack.last().map_or(Value::NULL, |f| f.outer_var_map);
                self.set_reg(a, outer);
                self.set_name(a, Value::NULL);
            }
            Opcode::GLOBALS_rA => {
                let globals = self.globals();
                self.set_reg(a, globals);
                self.set_name(a, Value::NULL);
            }

            // ── Control flow ──
            Opcode::JUMP_iABC => self.jump(bytecode::abc_s(word))?,
            Opcode::LT_rA_rB_rC => self.store_test(a, self.reg(b), self.reg(c), ops::lt),
            Opcode::LT_rA_rB_iC => self.store_test(a, self.reg(b), int(bytecode::c_s(word) as i32), ops::lt),
            Opcode::LT_rA_iB_rC => self.store_test(a, int(bytecode::b_s(word) as i32), self.reg(c), ops::lt),
            Opcode::LE_rA_rB_rC => self.store_test(a, self.reg(b), self.reg(c), ops::le),
            Opcode::LE_rA_rB_iC => self.store_test(a, self.reg(b), int(bytecode::c_s(word) as i32), ops::le),
            Opcode::LE_rA_iB_rC => self.store_test(a, int(bytecode::b_s(word) as i32), self.reg(c), ops::le),
            Opcode::EQ_rA_rB_rC => self.store_test(a, self.reg(b), self.reg(c), ops::equal),
            Opcode::EQ_rA_rB_iC => self.store_test(a, self.reg(b), int(bytecode::c_s(word) as i32), ops::equal),
            Opcode::NE_rA_rB_rC => self.store_test(a, self.reg(b), self.reg(c), not_equal),
            Opcode::NE_rA_rB_iC => self.store_test(a, self.reg(b), int(bytecode::c_s(word) as i32), not_equal),

            Opcode::BRTRUE_rA_iBC => {
                let cond = ops::is_truthy(&self.heap, self.reg(a));
                self.branch_if(cond, bytecode::bc_s(word) as i32)?;
            }
            Opcode::BRFALSE_rA_iBC => {
                let cond = !ops::is_truthy(&self.heap, self.reg(a));
                self.branch_if(cond, bytecode::bc_s(word) as i32)?;
            }
            Opcode::BRLT_rA_rB_iC
            | Opcode::BRLT_rA_iB_iC
            | Opcode::BRLT_iA_rB_iC
            | Opcode::BRLE_rA_rB_iC
            | Opcode::BRLE_rA_iB_iC
            | Opcode::BRLE_iA_rB_iC
            | Opcode::BREQ_rA_rB_iC
            | Opcode::BREQ_rA_iB_iC
            | Opcode::BRNE_rA_rB_iC
            | Opcode::BRNE_rA_iB_iC => {
                let (x, y, test) = self.fused_operands(op, word);
                let cond = self.test(x, y, test);
                self.branch_if(cond, bytecode::c_s(word) as i32)?;
            }
            Opcode::IFLT_rA_rB => self.skip_unless(self.test(self.reg(a), self.reg(b), ops::lt)),
            Opcode::IFLT_rA_iBC => self.skip_unless(self.test(self.reg(a), int(bytecode::bc_s(word) as i32), ops::lt)),
            Opcode::IFLT_iAB_rC => self.skip_unless(self.test(int(bytecode::ab_s(word) as i32), self.reg(c), ops::lt)),
            Opcode::IFLE_rA_rB => self.skip_unless(self.test(self.reg(a), self.reg(b), ops::le)),
            Opcode::IFLE_rA_iBC => self.skip_unless(self.test(self.reg(a), int(bytecode::bc_s(word) as i32), ops::le)),
            Opcode::IFLE_iAB_rC => self.skip_unless(self.test(int(bytecode::ab_s(word) as i32), self.reg(c), ops::le)),
            Opcode::IFEQ_rA_rB => self.skip_unless(self.test(self.reg(a), self.reg(b), ops::equal)),
            Opcode::IFEQ_rA_iBC => {
                self.skip_unless(self.test(self.reg(a), int(bytecode::bc_s(word) as i32), ops::equal))
            }
            Opcode::IFNE_rA_rB => self.skip_unless(self.test(self.reg(a), self.reg(b), not_equal)),
            Opcode::IFNE_rA_iBC => {
                self.skip_unless(self.test(self.reg(a), int(bytecode::bc_s(word) as i32), not_equal))
            }

            // ── Calls ──
            Opcode::ARGBLK_iABC => self.arg_block(bytecode::abc_s(word))?,
            Opcode::ARG_rA | Opcode::ARG_iABC => return Err(VmError::ArgWithoutBlock),
            Opcode::CALLF_iA_iBC => {
                let func = bytecode::bc_u(word) as usize;
                if func >= self.functions.len() {
                    return Err(VmError::InvalidFunctionIndex { index: func as i64 });
                }
                self.enter(CallSite {
                    func,
                    outer: Value::NULL,
                    callee_base: self.base + a as usize,
                    bound_args: None,
                    result_reg: None,
                    return_pc: self.pc,
                })?;
            }
            Opcode::CALLFN_iA_kBC => {
                let name = self.constant(bytecode::bc_u(word) as usize)?;
                self.call_intrinsic_by_name(name, self.base + a as usize)?;
            }
            Opcode::CALL_rA_rB_rC => {
                let target = self.reg(c);
                if target.is_funcref() {
                    self.call_value(target, self.base + b as usize, a)?;
                } else {
                    warn!(value = %self.display(target), "CALL on a value that is not a funcref");
                    self.set_reg(a, target);
                }
            }

            // ── Objects ──
            Opcode::NEW_rA_rB => {
                let (m, proto) = (self.heap.make_map(2), self.reg(b));
                self.heap.map_set(m, ISA_KEY, proto)?;
                self.set_reg(a, m);
            }
            Opcode::ISA_rA_rB_rC => {
                let (x, proto) = (self.reg(b), self.reg(c));
                let isa = x.identical(proto) || self.heap.isa_chain_contains(x, proto);
                self.set_reg(a, int(isa as i32));
            }
            Opcode::METHFIND_rA_rB_rC => {
                let (container, key) = (self.reg(b), self.reg(c));
                if container.is_map() {
                    let Some((method, origin_super)) = self.heap.map_lookup_with_origin(container, key) else {
                        return Err(VmError::KeyNotFound { key: self.display(key) });
                    };
                    self.set_reg(a, method);
                    self.pending.set(container, origin_super);
                } else {
                    let v = self.index_value(container, key)?;
                    self.set_reg(a, v);
                }
            }
            Opcode::SETSELF_rA => {
                let self_value = self.reg(a);
                self.pending.set_self(self_value);
            }
            Opcode::CALLIFREF_rA => {
                let target = self.reg(a);
                if target.is_funcref() && self.pending.active {
                    let callee_base = self.base + self.functions[self.func].max_regs as usize;
                    self.call_value(target, callee_base, a)?;
                } else {
                    self.pending.take();
                }
            }

            // ── Iteration ──
            Opcode::ITERGET_rA_rB_rC => {
                let v = self.iter_item(self.reg(b), index_of(self.reg(c)))?;
                self.set_reg(a, v);
            }
            Opcode::NEXT_rA_rB => {
                let index = index_of(self.reg(a)) + 1;
                self.set_reg(a, int(index as i32));
                let container = self.reg(b);
                let len = if container.is_list() {
                    self.heap.list_count(container)
                } else if container.is_map() {
                    self.heap.map_count(container)
                } else if container.is_string() {
                    self.heap.string_len(container)
                } else {
                    0
                };
                if index < len as i64 {
                    self.pc += 1;
                }
            }

            Opcode::RETURN => return Ok(self.return_from_frame()),
        }
        Ok(None)
    }

    fn fused_operands(&self, op: Opcode, word: u32) -> (Value, Value, Compare) {
        let (a, b) = (bytecode::a(word), bytecode::b(word));
        let imm_a = Value::int(bytecode::a_s(word) as i32);
        let imm_b = Value::int(bytecode::b_s(word) as i32);
        match op {
            Opcode::BRLT_rA_rB_iC => (self.reg(a), self.reg(b), ops::lt),
            Opcode::BRLT_rA_iB_iC => (self.reg(a), imm_b, ops::lt),
            Opcode::BRLT_iA_rB_iC => (imm_a, self.reg(b), ops::lt),
            Opcode::BRLE_rA_rB_iC => (self.reg(a), self.reg(b), ops::le),
            Opcode::BRLE_rA_iB_iC => (self.reg(a), imm_b, ops::le),
            Opcode::BRLE_iA_rB_iC => (imm_a, self.reg(b), ops::le),
            Opcode::BREQ_rA_rB_iC => (self.reg(a), self.reg(b), ops::equal),
            Opcode::BREQ_rA_iB_iC => (self.reg(a), imm_b, ops::equal),
            Opcode::BRNE_rA_rB_iC => (self.reg(a), self.reg(b), not_equal),
            _ => (self.reg(a), imm_b, not_equal),
        }
    }

    // ── Variables ──

    /// `R[b]` when that register is bound to the name `K[c]`, otherwise
    /// the name resolved through the enclosing scopes.
    fn load_named(&mut self, b: u8, c: u8) -> VmResult<Value> {
        let expected = self.constant(c as usize)?;
        let actual = self.heap.registers.names[self.base + b as usize];
        if self.heap.string_eq(actual, expected) {
            Ok(self.reg(b))
        } else {
            self.lookup_variable(expected)
        }
    }

    fn lookup_variable(&mut self, name: Value) -> VmResult<Value> {
        let outer = self.call_stack.last().map_or(Value::NULL, |f| f.outer_var_map);
        if let Some(v) = self.heap.map_try_get(outer, name) {
            return Ok(v);
        }
        if self.call_stack.len() > 1 {
            let globals = self.globals();
            if let Some(v) = self.heap.map_try_get(globals, name) {
                return Ok(v);
            }
        }
        if let Some(v) = self.heap.map_try_get(self.intrinsics, name) {
            return Ok(v);
        }
        if self.heap.string_eq(name, SELF_NAME) || self.heap.string_eq(name, SUPER_NAME) {
            return Ok(Value::NULL);
        }
        Err(VmError::UndefinedIdentifier { name: self.display(name) })
    }

    /// The current frame's variable map, created on first use.
    fn frame_locals(&mut self) -> Value {
        let (base, regs) = (self.base, self.functions[self.func].max_regs as usize);
        let Some(frame) = self.call_stack.last_mut() else { return Value::NULL };
        if frame.local_var_map.is_null() {
            frame.local_var_map = self.heap.make_varmap(base, regs);
        }
        frame.local_var_map
    }

    /// The entry frame's variable map.
    fn globals(&mut self) -> Value {
        let regs = self.functions[self.entry].max_regs as usize;
        let Some(frame) = self.call_stack.first_mut() else { return Value::NULL };
        if frame.local_var_map.is_null() {
            frame.local_var_map = self.heap.make_varmap(0, regs);
        }
        frame.local_var_map
    }

    // ── Containers ──

    fn index_value(&mut self, container: Value, index: Value) -> VmResult<Value> {
        if container.is_list() {
            let i = numeric_index("list", index)?;
            self.heap.list_get(container, i).ok_or(VmError::IndexOutOfRange { kind: "list", index: i })
        } else if container.is_map() {
            self.heap.map_lookup(container, index).ok_or_else(|| VmError::KeyNotFound { key: self.display(index) })
        } else if container.is_string() {
            let i = numeric_index("string", index)?;
            let pos = resolve_index(i, self.heap.string_len(container))
                .ok_or(VmError::IndexOutOfRange { kind: "string", index: i })?;
            Ok(self.heap.substring(container, pos, 1))
        } else {
            Err(VmError::CantIndex { what: self.display(container) })
        }
    }

    fn set_index(&mut self, container: Value, index: Value, value: Value) -> VmResult<()> {
        if container.is_list() {
            let i = numeric_index("list", index)?;
            self.heap.list_set(container, i, value)
        } else if container.is_map() {
            self.heap.map_set(container, index, value)
        } else {
            Err(VmError::CantSetIndex { what: self.display(container) })
        }
    }

    fn slice(&mut self, container: Value, start: Value, end: Value) -> VmResult<Value> {
        let len = if container.is_string() {
            self.heap.string_len(container)
        } else if container.is_list() {
            self.heap.list_count(container)
        } else {
            return Err(VmError::CantSlice { what: self.display(container) });
        };
        let kind = if container.is_string() { "string" } else { "list" };
        let s = if start.is_null() { 0 } else { numeric_index(kind, start)? };
        let e = if end.is_null() { len as i64 } else { numeric_index(kind, end)? };
        Ok(if container.is_string() {
            self.heap.string_slice(container, s, e)
        } else {
            self.heap.list_slice(container, s, e)
        })
    }

    fn iter_item(&mut self, container: Value, i: i64) -> VmResult<Value> {
        if container.is_list() {
            Ok(self.heap.list_get(container, i).unwrap_or(Value::NULL))
        } else if container.is_map() {
            let Some((k, v)) = usize::try_from(i).ok().and_then(|n| self.heap.map_entry_at(container, n)) else {
                return Ok(Value::NULL);
            };
            let entry = self.heap.make_map(2);
            self.heap.map_set(entry, KEY_NAME, k)?;
            self.heap.map_set(entry, VALUE_NAME, v)?;
            Ok(entry)
        } else if container.is_string() {
            Ok(match resolve_index(i, self.heap.string_len(container)) {
                Some(pos) => self.heap.substring(container, pos, 1),
                None => Value::NULL,
            })
        } else {
            Ok(Value::NULL)
        }
    }

    // ── Call protocol ──

    fn resolve_funcref(&self, target: Value) -> VmResult<(usize, Value)> {
        let index = self.heap.funcref_index(target).unwrap_or(-1);
        if index < 0 || index as usize >= self.functions.len() {
            return Err(VmError::InvalidFunctionIndex { index: index as i64 });
        }
        Ok((index as usize, self.heap.funcref_outer(target)))
    }

    /// Callee frame `[callee_base, callee_base + max_regs)` must fit the arena.
    fn check_frame(&self, callee_base: usize, func: usize) -> VmResult<()> {
        let f = &self.functions[func];
        let needed = (f.max_regs as usize).max(f.param_count() + 1);
        if callee_base + needed > self.heap.registers.len() {
            return Err(VmError::StackOverflow);
        }
        Ok(())
    }

    /// Call through a funcref with no arguments, result to `R[result_reg]`.
    fn call_value(&mut self, target: Value, callee_base: usize, result_reg: u8) -> VmResult<()> {
        let (func, outer) = self.resolve_funcref(target)?;
        self.enter(CallSite {
            func,
            outer,
            callee_base,
            bound_args: Some(0),
            result_reg: Some(result_reg),
            return_pc: self.pc,
        })
    }

    /// `ARGBLK n; ARG ...×n; CALL rA, rB, rC`
    fn arg_block(&mut self, count: i32) -> VmResult<()> {
        let Ok(count) = usize::try_from(count) else { return Err(VmError::ArgBlockOutOfRange) };
        let call_pc = self.pc + count;
        let Some(&call_word) = self.functions[self.func].code.get(call_pc) else {
            return Err(VmError::ArgBlockOutOfRange);
        };
        if bytecode::op(call_word) != Opcode::CALL_rA_rB_rC as u8 {
            return Err(VmError::ArgBlockWithoutCall);
        }
        let (ra, rb, rc) = (bytecode::a(call_word), bytecode::b(call_word), bytecode::c(call_word));
        let target = self.reg(rc);
        if !target.is_funcref() {
            return Err(VmError::NotCallable { what: self.display(target) });
        }
        let (func, outer) = self.resolve_funcref(target)?;
        let callee_base = self.base + rb as usize;
        self.check_frame(callee_base, func)?;
        self.bind_arguments(count, callee_base, func)?;
        self.enter(CallSite {
            func,
            outer,
            callee_base,
            bound_args: Some(count),
            result_reg: Some(ra),
            return_pc: call_pc + 1,
        })
    }

    /// Copy the ARG operands following the current pc into the callee's
    /// parameter registers and bind their names.
    fn bind_arguments(&mut self, count: usize, callee_base: usize, func: usize) -> VmResult<()> {
        let expected = self.functions[func].param_count();
        if count > expected {
            return Err(VmError::TooManyArguments { got: count, expected });
        }
        let code = &self.functions[self.func].code;
        let mut args = Vec::with_capacity(count);
        for &word in &code[self.pc..self.pc + count] {
            let v = match Opcode::from_u8(bytecode::op(word)) {
                Some(Opcode::ARG_rA) => self.heap.registers.values[self.base + bytecode::a(word) as usize],
                Some(Opcode::ARG_iABC) => Value::int(bytecode::abc_s(word)),
                _ => return Err(VmError::ExpectedArg),
            };
            args.push(v);
        }
        let names = &self.functions[func].param_names;
        let regs = &mut self.heap.registers;
        for (i, v) in args.into_iter().enumerate() {
            regs.values[callee_base + 1 + i] = v;
            regs.names[callee_base + 1 + i] = names[i];
        }
        Ok(())
    }

    /// Fill defaults for unsupplied parameters, clear r0 and the locals.
    fn setup_call_frame(&mut self, arg_count: usize, callee_base: usize, func: usize) {
        let f = &self.functions[func];
        let regs = &mut self.heap.registers;
        for i in arg_count..f.param_count() {
            regs.values[callee_base + 1 + i] = f.param_defaults[i];
            regs.names[callee_base + 1 + i] = f.param_names[i];
        }
        regs.values[callee_base] = Value::NULL;
        regs.names[callee_base] = Value::NULL;
        for r in f.param_count() + 1..f.max_regs as usize {
            regs.values[callee_base + r] = Value::NULL;
            regs.names[callee_base + r] = Value::NULL;
        }
    }

    fn apply_pending_context(&mut self, callee_base: usize, func: usize) {
        let Some((self_value, super_value)) = self.pending.take() else { return };
        let f = &self.functions[func];
        let regs = &mut self.heap.registers;
        if let Some(r) = f.self_reg() {
            regs.values[callee_base + r] = self_value;
            regs.names[callee_base + r] = SELF_NAME;
        }
        if let Some(r) = f.super_reg() {
            regs.values[callee_base + r] = super_value;
            regs.names[callee_base + r] = SUPER_NAME;
        }
    }

    /// Bind and switch to `site.func`; natives run to completion in place.
    fn enter(&mut self, site: CallSite) -> VmResult<()> {
        self.check_frame(site.callee_base, site.func)?;
        let native = self.functions[site.func].native.clone();
        if native.is_none() && self.call_stack.len() >= self.config.call_stack_size {
            return Err(VmError::CallStackOverflow);
        }
        if let Some(bound) = site.bound_args {
            self.setup_call_frame(bound, site.callee_base, site.func);
        }
        self.apply_pending_context(site.callee_base, site.func);

        if let Some(native) = native {
            let count = self.functions[site.func].param_count();
            let result = native.call(&mut IntrinsicCall::new(&mut self.heap, &mut self.io, site.callee_base + 1, count))?;
            let dest = match site.result_reg {
                Some(r) => self.base + r as usize,
                None => site.callee_base,
            };
            self.heap.registers.values[dest] = result;
            self.pc = site.return_pc;
            return Ok(());
        }

        self.call_stack.push(CallInfo::new(site.return_pc, self.base, self.func, site.result_reg, site.outer));
        debug!(callee = %self.functions[site.func].name, depth = self.call_stack.len(), "call");
        self.base = site.callee_base;
        self.func = site.func;
        self.pc = 0;
        Ok(())
    }

    /// `CALLFN`: run the intrinsic named `name` with arguments at `args_start`.
    fn call_intrinsic_by_name(&mut self, name: Value, args_start: usize) -> VmResult<()> {
        let unknown = || VmError::UnknownIntrinsic { name: self.display(name) };
        let target = self.heap.map_try_get(self.intrinsics, name).ok_or_else(unknown)?;
        let (func, _) = self.resolve_funcref(target)?;
        let native = self.functions[func].native.clone().ok_or_else(unknown)?;
        let count = self.functions[func].param_count();
        if args_start + count.max(1) > self.heap.registers.len() {
            return Err(VmError::StackOverflow);
        }
        let result = native.call(&mut IntrinsicCall::new(&mut self.heap, &mut self.io, args_start, count))?;
        self.heap.registers.values[args_start] = result;
        Ok(())
    }

    /// Pop the current frame. `Some(result)` when it was the entry frame.
    fn return_from_frame(&mut self) -> Option<Value> {
        let result = self.heap.registers.values[self.base];
        let Some(frame) = self.call_stack.pop() else { return Some(result) };
        if !frame.local_var_map.is_null() {
            self.heap.varmap_gather(frame.local_var_map);
        }
        if self.call_stack.is_empty() {
            debug!(result = %self.display(result), "entry function returned");
            return Some(result);
        }
        debug!(from = %self.functions[self.func].name, depth = self.call_stack.len(), "return");
        self.pc = frame.return_pc;
        self.base = frame.return_base;
        self.func = frame.return_func;
        if let Some(r) = frame.result_reg {
            self.set_reg(r, result);
        }
        None
    }
}

fn not_equal(heap: &Heap, a: Value, b: Value) -> bool {
    !ops::equal(heap, a, b)
}

fn numeric_index(kind: &'static str, v: Value) -> VmResult<i64> {
    v.as_number().map(|n| n as i64).ok_or(VmError::NonNumericIndex { kind, found: v.type_name() })
}

fn index_of(v: Value) -> i64 {
    v.as_number().map_or(0, |n| n as i64)
}
