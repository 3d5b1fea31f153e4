use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use miniscript_vm::bytecode::{self, Opcode};
use miniscript_vm::value::ops;
use miniscript_vm::{ErrorPool, Heap, Program, Value, Vm, VmConfig, VmState};

fn load_with(config: VmConfig, program: serde_json::Value) -> Vm {
    let program = Program::from_json(&program.to_string()).expect("valid program JSON");
    let mut vm = Vm::new(config);
    let functions = program.into_funcdefs(vm.heap_mut()).expect("program assembles");
    vm.reset(functions).expect("reset succeeds");
    vm
}

fn load(program: serde_json::Value) -> Vm {
    load_with(VmConfig::default(), program)
}

fn main_only(code: serde_json::Value) -> serde_json::Value {
    json!({ "functions": [{ "name": "@main", "code": code }] })
}

// --- End-to-end programs ---

#[test]
fn add_two_registers() {
    let mut vm = load(main_only(json!([
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 10 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 3 },
        { "op": "ADD_rA_rB_rC", "a": 2, "b": 0, "c": 1 },
        { "op": "LOAD_rA_rB", "a": 0, "b": 2 },
        { "op": "RETURN" }
    ])));
    assert_eq!(vm.run(0), Value::int(13));
    assert_eq!(vm.state(), VmState::Halted);
    assert!(!vm.errors().has_error());
}

fn sum_loop() -> serde_json::Value {
    main_only(json!([
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 0 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 1 },
        { "op": "LT_rA_iB_rC", "a": 2, "b": 5, "c": 1 },
        { "op": "BRTRUE_rA_iBC", "a": 2, "bc": 4 },
        { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 1 },
        { "op": "LOAD_rA_iBC", "a": 2, "bc": 1 },
        { "op": "ADD_rA_rB_rC", "a": 1, "b": 1, "c": 2 },
        { "op": "JUMP_iABC", "abc": -6 },
        { "op": "RETURN" }
    ]))
}

#[test]
fn sum_one_to_five() {
    let mut vm = load(sum_loop());
    assert_eq!(vm.run(0), Value::int(15));
}

#[test]
fn single_steps_match_a_full_run() {
    let program = main_only(json!([
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 1 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 2 },
        { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 1 },
        { "op": "MULT_rA_rB_rC", "a": 0, "b": 0, "c": 0 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 4 },
        { "op": "SUB_rA_rB_rC", "a": 0, "b": 0, "c": 1 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 2 },
        { "op": "DIV_rA_rB_rC", "a": 0, "b": 0, "c": 1 },
        { "op": "NOOP" },
        { "op": "RETURN" }
    ]));
    let expected = load(program.clone()).run(0);
    assert_eq!(expected, Value::double(2.5));

    let mut vm = load(program);
    let mut cycles = 0;
    let result = loop {
        let r = vm.run(1);
        cycles += 1;
        if vm.state() == VmState::Halted {
            break r;
        }
        assert_eq!(vm.state(), VmState::Suspended);
        assert_eq!(r, Value::NULL);
        assert_eq!(vm.pc(), cycles);
    };
    assert_eq!(cycles, 10);
    assert_eq!(result, expected);
}

#[test]
fn loop_resumes_across_budgets() {
    let mut vm = load(sum_loop());
    let mut result = vm.run(7);
    while vm.state() == VmState::Suspended {
        result = vm.run(7);
    }
    assert_eq!(result, Value::int(15));
}

// --- Call protocol ---

fn adder_program(args: &[i64]) -> serde_json::Value {
    let mut main = vec![
        json!({ "op": "FUNCREF_iA_iBC", "a": 1, "bc": 1 }),
        json!({ "op": "ARGBLK_iABC", "abc": args.len() }),
    ];
    main.extend(args.iter().map(|a| json!({ "op": "ARG_iABC", "abc": a })));
    main.push(json!({ "op": "CALL_rA_rB_rC", "a": 0, "b": 2, "c": 1 }));
    main.push(json!({ "op": "RETURN" }));
    json!({ "functions": [
        { "name": "@main", "code": main },
        {
            "name": "f",
            "params": [{ "name": "a" }, { "name": "b", "default": 10 }],
            "code": [
                { "op": "ADD_rA_rB_rC", "a": 0, "b": 1, "c": 2 },
                { "op": "RETURN" }
            ]
        }
    ]})
}

#[test]
fn missing_argument_takes_default() {
    assert_eq!(load(adder_program(&[5])).run(0), Value::int(15));
    assert_eq!(load(adder_program(&[5, -5])).run(0), Value::int(0));
}

#[test]
fn too_many_arguments_halts() {
    let mut vm = load(adder_program(&[1, 2, 3]));
    assert_eq!(vm.run(0), Value::NULL);
    assert_eq!(vm.state(), VmState::Halted);
    assert_eq!(vm.errors().top_error().as_deref(), Some("Runtime Error: Too many arguments: got 3, expected 2"));
    assert_eq!(vm.run(0), Value::NULL, "a halted VM stays halted");
}

#[test]
fn closure_sees_writes_made_before_its_frame_returned() {
    let mut vm = load(json!({ "functions": [
        {
            "name": "@main",
            "code": [
                { "op": "FUNCREF_iA_iBC", "a": 1, "bc": 1 },
                { "op": "CALL_rA_rB_rC", "a": 2, "b": 3, "c": 1 },
                { "op": "CALL_rA_rB_rC", "a": 0, "b": 3, "c": 2 },
                { "op": "RETURN" }
            ]
        },
        {
            "name": "maker",
            "constants": ["x"],
            "code": [
                { "op": "LOAD_rA_iBC", "a": 1, "bc": 1 },
                { "op": "NAME_rA_kBC", "a": 1, "bc": 0 },
                { "op": "FUNCREF_iA_iBC", "a": 0, "bc": 2 },
                { "op": "LOAD_rA_iBC", "a": 2, "bc": 5 },
                { "op": "ASSIGN_rA_rB_kC", "a": 1, "b": 2, "c": 0 },
                { "op": "RETURN" }
            ]
        },
        {
            "name": "closure",
            "constants": ["x"],
            "code": [
                { "op": "LOADV_rA_rB_kC", "a": 0, "b": 0, "c": 0 },
                { "op": "RETURN" }
            ]
        }
    ]}));
    assert_eq!(vm.run(0), Value::int(5));
}

#[test]
fn functions_see_globals() {
    let mut vm = load(json!({ "functions": [
        {
            "name": "@main",
            "constants": ["limit"],
            "code": [
                { "op": "LOAD_rA_iBC", "a": 1, "bc": 99 },
                { "op": "NAME_rA_kBC", "a": 1, "bc": 0 },
                { "op": "CALLF_iA_iBC", "a": 2, "bc": 1 },
                { "op": "LOAD_rA_rB", "a": 0, "b": 2 },
                { "op": "RETURN" }
            ]
        },
        {
            "name": "readLimit",
            "constants": ["limit"],
            "code": [
                { "op": "LOADV_rA_rB_kC", "a": 0, "b": 0, "c": 0 },
                { "op": "RETURN" }
            ]
        }
    ]}));
    assert_eq!(vm.run(0), Value::int(99));
}

#[test]
fn undefined_identifier_report() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": ["zzz"],
        "code": [
            { "op": "LOADV_rA_rB_kC", "a": 0, "b": 0, "c": 0 },
            { "op": "RETURN" }
        ]
    }]}));
    assert_eq!(vm.run(0), Value::NULL);
    assert_eq!(
        vm.report_runtime_error().as_deref(),
        Some("Runtime Error: Undefined Identifier: 'zzz' is unknown in this context [@main line 0]")
    );
}

// --- Values ---

#[test]
fn int_overflow_promotes_to_double() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": [2147483647],
        "code": [
            { "op": "LOAD_rA_kBC", "a": 1, "bc": 0 },
            { "op": "LOAD_rA_iBC", "a": 2, "bc": 1 },
            { "op": "ADD_rA_rB_rC", "a": 0, "b": 1, "c": 2 },
            { "op": "RETURN" }
        ]
    }]}));
    let result = vm.run(0);
    assert!(result.is_double());
    assert_eq!(result.as_double(), 2147483648.0);

    let mut heap = Heap::new(4);
    assert_eq!(ops::add(&mut heap, Value::int(i32::MAX), Value::int(1)), Value::double(2147483648.0));
}

#[test]
fn equal_strings_need_not_be_identical() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": ["hello world", "hello world"],
        "code": [
            { "op": "LOAD_rA_kBC", "a": 1, "bc": 0 },
            { "op": "LOAD_rA_kBC", "a": 2, "bc": 1 },
            { "op": "EQ_rA_rB_rC", "a": 0, "b": 1, "c": 2 },
            { "op": "RETURN" }
        ]
    }]}));
    assert_eq!(vm.run(0), Value::int(1));
    let k = &vm.functions()[0].constants;
    assert!(!k[0].identical(k[1]));
    assert!(ops::equal(vm.heap(), k[0], k[1]));

    assert!(Value::NULL.identical(Value::NULL));
    assert!(ops::equal(vm.heap(), Value::NULL, Value::NULL));
    assert!(!ops::equal(vm.heap(), Value::NULL, Value::int(0)));
}

#[test]
fn int_bitcast_and_tiny_strings() {
    for i in [i32::MIN, -1, 0, 1, i32::MAX] {
        assert_eq!(Value::int(i).as_int(), i);
    }
    let mut heap = Heap::new(4);
    let before = heap.live_objects();
    assert!(heap.make_string("abcde").is_tiny_string());
    assert_eq!(heap.live_objects(), before);
    assert!(heap.make_string("abcdef").is_heap_string());
    assert_eq!(heap.live_objects(), before + 1);
}

#[test]
fn instruction_shapes_decode_to_their_fields() {
    let w = bytecode::ins_abc(Opcode::ADD_rA_rB_rC, 255, 0, 7);
    assert_eq!((bytecode::op(w), bytecode::a(w), bytecode::b(w), bytecode::c(w)), (Opcode::ADD_rA_rB_rC as u8, 255, 0, 7));
    let w = bytecode::ins_a_bc(Opcode::LOAD_rA_iBC, 3, i16::MIN);
    assert_eq!((bytecode::a(w), bytecode::bc_s(w)), (3, i16::MIN));
    let w = bytecode::ins_ab_c(Opcode::IFLT_iAB_rC, -1, 9);
    assert_eq!((bytecode::ab_s(w), bytecode::c(w)), (-1, 9));
    let w = bytecode::ins_abc24(Opcode::JUMP_iABC, -(1 << 23));
    assert_eq!(bytecode::abc_s(w), -(1 << 23));
    let w = bytecode::ins_a(Opcode::LOADNULL_rA, 200);
    assert_eq!((bytecode::op(w), bytecode::a(w)), (Opcode::LOADNULL_rA as u8, 200));
}

// --- Objects and intrinsics ---

/// proto = {"get": getN, "n": 1}; obj = new proto; obj.n = 42; then `tail`.
/// Registers: r1 proto, r2 "get", r4 obj, r5 "n".
fn run_object_program(tail: serde_json::Value) -> (Vm, Value) {
    let mut code = vec![
        json!({ "op": "MAP_rA_iBC", "a": 1, "bc": 2 }),
        json!({ "op": "LOAD_rA_kBC", "a": 2, "bc": 0 }),
        json!({ "op": "FUNCREF_iA_iBC", "a": 3, "bc": 1 }),
        json!({ "op": "IDXSET_rA_rB_rC", "a": 1, "b": 2, "c": 3 }),
        json!({ "op": "LOAD_rA_kBC", "a": 5, "bc": 1 }),
        json!({ "op": "LOAD_rA_iBC", "a": 6, "bc": 1 }),
        json!({ "op": "IDXSET_rA_rB_rC", "a": 1, "b": 5, "c": 6 }),
        json!({ "op": "NEW_rA_rB", "a": 4, "b": 1 }),
        json!({ "op": "LOAD_rA_iBC", "a": 6, "bc": 42 }),
        json!({ "op": "IDXSET_rA_rB_rC", "a": 4, "b": 5, "c": 6 }),
    ];
    code.extend(tail.as_array().cloned().unwrap_or_default());
    let mut vm = load(json!({ "functions": [
        { "name": "@main", "constants": ["get", "n"], "code": code },
        {
            "name": "getN",
            "params": [{ "name": "self" }],
            "constants": ["n"],
            "code": [
                { "op": "LOAD_rA_kBC", "a": 2, "bc": 0 },
                { "op": "INDEX_rA_rB_rC", "a": 0, "b": 1, "c": 2 },
                { "op": "RETURN" }
            ]
        }
    ]}));
    let result = vm.run(0);
    (vm, result)
}

#[test]
fn method_lookup_binds_self() {
    let (vm, result) = run_object_program(json!([
        { "op": "METHFIND_rA_rB_rC", "a": 7, "b": 4, "c": 2 },
        { "op": "CALLIFREF_rA", "a": 7 },
        { "op": "LOAD_rA_rB", "a": 0, "b": 7 },
        { "op": "RETURN" }
    ]));
    assert_eq!(vm.runtime_error(), None);
    assert_eq!(result, Value::int(42));
}

#[test]
fn setself_rebinds_a_method_found_elsewhere() {
    // proto.get run against obj: reads obj.n, not proto.n
    let (_, result) = run_object_program(json!([
        { "op": "METHFIND_rA_rB_rC", "a": 7, "b": 1, "c": 2 },
        { "op": "SETSELF_rA", "a": 4 },
        { "op": "CALLIFREF_rA", "a": 7 },
        { "op": "LOAD_rA_rB", "a": 0, "b": 7 },
        { "op": "RETURN" }
    ]));
    assert_eq!(result, Value::int(42));

    let (_, result) = run_object_program(json!([
        { "op": "METHFIND_rA_rB_rC", "a": 7, "b": 1, "c": 2 },
        { "op": "CALLIFREF_rA", "a": 7 },
        { "op": "LOAD_rA_rB", "a": 0, "b": 7 },
        { "op": "RETURN" }
    ]));
    assert_eq!(result, Value::int(1));
}

#[test]
fn isa_walks_the_prototype_chain() {
    let (vm, _) = run_object_program(json!([
        { "op": "ISA_rA_rB_rC", "a": 7, "b": 4, "c": 1 },
        { "op": "ISA_rA_rB_rC", "a": 8, "b": 1, "c": 4 },
        { "op": "ISA_rA_rB_rC", "a": 9, "b": 4, "c": 4 },
        { "op": "LOADNULL_rA", "a": 0 },
        { "op": "RETURN" }
    ]));
    assert_eq!(vm.stack_value(7), Value::int(1));
    assert_eq!(vm.stack_value(8), Value::int(0));
    assert_eq!(vm.stack_value(9), Value::int(1));
}

#[test]
fn missing_key_is_fatal() {
    let (vm, _) = run_object_program(json!([
        { "op": "LOAD_rA_iBC", "a": 2, "bc": 7 },
        { "op": "INDEX_rA_rB_rC", "a": 0, "b": 4, "c": 2 },
        { "op": "RETURN" }
    ]));
    assert_eq!(vm.runtime_error(), Some("Key Not Found: '7' not found in map"));
}

#[test]
fn print_goes_through_the_host_sink() {
    let printed = Rc::new(RefCell::new(Vec::new()));
    let sink = printed.clone();
    let program = Program::from_json(
        &json!({ "functions": [{
            "name": "@main",
            "constants": ["print", "hello world"],
            "code": [
                { "op": "LOAD_rA_kBC", "a": 1, "bc": 1 },
                { "op": "CALLFN_iA_kBC", "a": 1, "bc": 0 },
                { "op": "LOADV_rA_rB_kC", "a": 2, "b": 2, "c": 0 },
                { "op": "ARGBLK_iABC", "abc": 1 },
                { "op": "ARG_iABC", "abc": 7 },
                { "op": "CALL_rA_rB_rC", "a": 0, "b": 3, "c": 2 },
                { "op": "RETURN" }
            ]
        }]})
        .to_string(),
    )
    .unwrap();
    let mut vm = Vm::new(VmConfig::default());
    vm.set_print_sink(move |line| sink.borrow_mut().push(line.to_string()));
    let functions = program.into_funcdefs(vm.heap_mut()).unwrap();
    vm.reset(functions).unwrap();
    assert_eq!(vm.run(0), Value::NULL);
    assert_eq!(vm.runtime_error(), None);
    assert_eq!(*printed.borrow(), vec!["hello world".to_string(), "7".to_string()]);
}

#[test]
fn frozen_copy_rejects_writes() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": ["frozenCopy"],
        "code": [
            { "op": "LIST_rA_iBC", "a": 1, "bc": 1 },
            { "op": "LOAD_rA_iBC", "a": 2, "bc": 0 },
            { "op": "PUSH_rA_rB", "a": 1, "b": 2 },
            { "op": "CALLFN_iA_kBC", "a": 1, "bc": 0 },
            { "op": "LOAD_rA_iBC", "a": 2, "bc": 5 },
            { "op": "PUSH_rA_rB", "a": 1, "b": 2 },
            { "op": "RETURN" }
        ]
    }]}));
    assert_eq!(vm.run(0), Value::NULL);
    assert_eq!(vm.runtime_error(), Some("Attempt to modify a frozen list"));
    let copy = vm.stack_value(1);
    assert!(vm.heap().is_frozen(copy));
    assert_eq!(vm.display(copy), "[0]");
}

#[test]
fn runtime_errors_reach_a_shared_pool() {
    let pool = ErrorPool::new();
    let program = Program::from_json(
        &main_only(json!([
            { "op": "LOAD_rA_iBC", "a": 1, "bc": 3 },
            { "op": "SLICE_rA_rB_rC", "a": 0, "b": 1, "c": 1 },
            { "op": "RETURN" }
        ]))
        .to_string(),
    )
    .unwrap();
    let mut vm = Vm::new(VmConfig::default()).with_error_pool(pool.clone());
    let functions = program.into_funcdefs(vm.heap_mut()).unwrap();
    vm.reset(functions).unwrap();
    vm.run(0);
    assert_eq!(pool.top_error().as_deref(), Some("Runtime Error: Can't slice 3"));
}

#[test]
fn small_stack_overflows() {
    let mut vm = load_with(
        VmConfig::default().with_stack_size(8),
        json!({ "functions": [
            { "name": "@main", "code": [
                { "op": "CALLF_iA_iBC", "a": 1, "bc": 1 },
                { "op": "RETURN" }
            ]},
            { "name": "deep", "max_regs": 12, "code": [{ "op": "RETURN" }] }
        ]}),
    );
    assert_eq!(vm.run(0), Value::NULL);
    assert_eq!(vm.runtime_error(), Some("Stack overflow"));
}

#[test]
fn string_replication_past_the_limit_halts() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": ["ab", 1e20],
        "code": [
            { "op": "LOAD_rA_kBC", "a": 1, "bc": 0 },
            { "op": "LOAD_rA_kBC", "a": 2, "bc": 1 },
            { "op": "MULT_rA_rB_rC", "a": 0, "b": 1, "c": 2 },
            { "op": "RETURN" }
        ]
    }]}));
    assert_eq!(vm.run(0), Value::NULL);
    assert_eq!(vm.state(), VmState::Halted);
    assert_eq!(vm.runtime_error(), Some("String too long"));
}

// --- Variable maps ---

#[test]
fn locals_and_globals_as_maps() {
    let mut vm = load(json!({ "functions": [
        {
            "name": "@main",
            "constants": ["g"],
            "code": [
                { "op": "LOAD_rA_iBC", "a": 1, "bc": 7 },
                { "op": "NAME_rA_kBC", "a": 1, "bc": 0 },
                { "op": "CALLF_iA_iBC", "a": 3, "bc": 1 },
                { "op": "LOAD_rA_rB", "a": 0, "b": 3 },
                { "op": "RETURN" }
            ]
        },
        {
            "name": "inspect",
            "constants": ["x"],
            "code": [
                { "op": "LOAD_rA_iBC", "a": 1, "bc": 3 },
                { "op": "NAME_rA_kBC", "a": 1, "bc": 0 },
                { "op": "LOCALS_rA", "a": 2 },
                { "op": "GLOBALS_rA", "a": 3 },
                { "op": "OUTER_rA", "a": 4 },
                { "op": "LIST_rA_iBC", "a": 0, "bc": 3 },
                { "op": "PUSH_rA_rB", "a": 0, "b": 2 },
                { "op": "PUSH_rA_rB", "a": 0, "b": 3 },
                { "op": "PUSH_rA_rB", "a": 0, "b": 4 },
                { "op": "RETURN" }
            ]
        }
    ]}));
    let result = vm.run(0);
    assert_eq!(vm.runtime_error(), None);
    assert_eq!(vm.display(result), r#"[{"x": 3}, {"g": 7}, null]"#);
}

#[test]
fn outer_is_the_defining_frame() {
    let mut vm = load(json!({ "functions": [
        {
            "name": "@main",
            "constants": ["k"],
            "code": [
                { "op": "FUNCREF_iA_iBC", "a": 1, "bc": 1 },
                { "op": "LOAD_rA_iBC", "a": 2, "bc": 4 },
                { "op": "NAME_rA_kBC", "a": 2, "bc": 0 },
                { "op": "CALL_rA_rB_rC", "a": 0, "b": 3, "c": 1 },
                { "op": "RETURN" }
            ]
        },
        {
            "name": "closure",
            "code": [
                { "op": "OUTER_rA", "a": 0 },
                { "op": "RETURN" }
            ]
        }
    ]}));
    let result = vm.run(0);
    assert!(result.is_map());
    assert_eq!(vm.display(result), r#"{"k": 4}"#);
}

#[test]
fn loadc_calls_a_funcref_and_loads_anything_else() {
    let mut vm = load(json!({ "functions": [
        {
            "name": "@main",
            "constants": ["f", "n"],
            "code": [
                { "op": "FUNCREF_iA_iBC", "a": 1, "bc": 1 },
                { "op": "NAME_rA_kBC", "a": 1, "bc": 0 },
                { "op": "LOADC_rA_rB_kC", "a": 0, "b": 1, "c": 0 },
                { "op": "LOAD_rA_iBC", "a": 2, "bc": 5 },
                { "op": "NAME_rA_kBC", "a": 2, "bc": 1 },
                { "op": "LOADC_rA_rB_kC", "a": 3, "b": 2, "c": 1 },
                { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 3 },
                { "op": "RETURN" }
            ]
        },
        {
            "name": "f",
            "code": [
                { "op": "LOAD_rA_iBC", "a": 0, "bc": 21 },
                { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 0 },
                { "op": "RETURN" }
            ]
        }
    ]}));
    assert_eq!(vm.run(0), Value::int(47));
}

// --- Logic and arithmetic ---

#[test]
fn fuzzy_logic_opcodes() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": [0.5, "", "x"],
        "code": [
            { "op": "LOAD_rA_kBC", "a": 1, "bc": 0 },
            { "op": "AND_rA_rB_rC", "a": 2, "b": 1, "c": 1 },
            { "op": "OR_rA_rB_rC", "a": 3, "b": 1, "c": 1 },
            { "op": "NOT_rA_rB", "a": 4, "b": 2 },
            { "op": "LOAD_rA_kBC", "a": 5, "bc": 1 },
            { "op": "NOT_rA_rB", "a": 5, "b": 5 },
            { "op": "LOAD_rA_kBC", "a": 6, "bc": 2 },
            { "op": "NOT_rA_rB", "a": 6, "b": 6 },
            { "op": "LIST_rA_iBC", "a": 0, "bc": 5 },
            { "op": "PUSH_rA_rB", "a": 0, "b": 2 },
            { "op": "PUSH_rA_rB", "a": 0, "b": 3 },
            { "op": "PUSH_rA_rB", "a": 0, "b": 4 },
            { "op": "PUSH_rA_rB", "a": 0, "b": 5 },
            { "op": "PUSH_rA_rB", "a": 0, "b": 6 },
            { "op": "RETURN" }
        ]
    }]}));
    let result = vm.run(0);
    assert_eq!(vm.display(result), "[0.25, 0.75, 0.75, 1, 0]");
}

#[test]
fn modulo_by_zero_is_null() {
    let mut vm = load(main_only(json!([
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 7 },
        { "op": "LOAD_rA_iBC", "a": 2, "bc": 3 },
        { "op": "LOAD_rA_iBC", "a": 3, "bc": -7 },
        { "op": "LOAD_rA_iBC", "a": 4, "bc": 0 },
        { "op": "LIST_rA_iBC", "a": 0, "bc": 3 },
        { "op": "MOD_rA_rB_rC", "a": 5, "b": 1, "c": 2 },
        { "op": "PUSH_rA_rB", "a": 0, "b": 5 },
        { "op": "MOD_rA_rB_rC", "a": 5, "b": 3, "c": 2 },
        { "op": "PUSH_rA_rB", "a": 0, "b": 5 },
        { "op": "MOD_rA_rB_rC", "a": 5, "b": 1, "c": 4 },
        { "op": "PUSH_rA_rB", "a": 0, "b": 5 },
        { "op": "RETURN" }
    ])));
    let result = vm.run(0);
    assert_eq!(vm.runtime_error(), None);
    assert_eq!(vm.display(result), "[1, -1, null]");
}

// --- Branches ---

#[test]
fn brfalse_jumps_only_on_falsy() {
    let mut vm = load(main_only(json!([
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 1 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 0 },
        { "op": "BRFALSE_rA_iBC", "a": 1, "bc": 1 },
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 99 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 1 },
        { "op": "BRFALSE_rA_iBC", "a": 1, "bc": 1 },
        { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 1 },
        { "op": "RETURN" }
    ])));
    assert_eq!(vm.run(0), Value::int(2));
}

#[test]
fn ifle_skips_when_greater() {
    let mut vm = load(main_only(json!([
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 0 },
        { "op": "LOAD_rA_iBC", "a": 1, "bc": 3 },
        { "op": "LOAD_rA_iBC", "a": 2, "bc": 3 },
        { "op": "IFLE_rA_rB", "a": 1, "b": 2 },
        { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 1 },
        { "op": "IFLE_rA_iBC", "a": 1, "bc": 2 },
        { "op": "LOAD_rA_iBC", "a": 0, "bc": 99 },
        { "op": "IFLE_iAB_rC", "ab": -1, "c": 1 },
        { "op": "ADD_rA_rB_rC", "a": 0, "b": 0, "c": 0 },
        { "op": "RETURN" }
    ])));
    assert_eq!(vm.run(0), Value::int(6));
}

// --- Iteration ---

#[test]
fn map_iteration_yields_key_value_maps_in_insertion_order() {
    let mut vm = load(json!({ "functions": [{
        "name": "@main",
        "constants": ["beta", "alpha"],
        "code": [
            { "op": "MAP_rA_iBC", "a": 1, "bc": 2 },
            { "op": "LOAD_rA_kBC", "a": 2, "bc": 0 },
            { "op": "LOAD_rA_iBC", "a": 3, "bc": 1 },
            { "op": "IDXSET_rA_rB_rC", "a": 1, "b": 2, "c": 3 },
            { "op": "LOAD_rA_kBC", "a": 2, "bc": 1 },
            { "op": "LOAD_rA_iBC", "a": 3, "bc": 2 },
            { "op": "IDXSET_rA_rB_rC", "a": 1, "b": 2, "c": 3 },
            { "op": "LIST_rA_iBC", "a": 0, "bc": 2 },
            { "op": "LOAD_rA_iBC", "a": 4, "bc": -1 },
            { "op": "NEXT_rA_rB", "a": 4, "b": 1 },
            { "op": "JUMP_iABC", "abc": 3 },
            { "op": "ITERGET_rA_rB_rC", "a": 5, "b": 1, "c": 4 },
            { "op": "PUSH_rA_rB", "a": 0, "b": 5 },
            { "op": "JUMP_iABC", "abc": -5 },
            { "op": "RETURN" }
        ]
    }]}));
    let result = vm.run(0);
    assert_eq!(vm.runtime_error(), None);
    assert_eq!(vm.display(result), r#"[{"key": "beta", "value": 1}, {"key": "alpha", "value": 2}]"#);
    let entries = vm.heap().list_items(result).expect("list result");
    assert!(entries.iter().all(|e| e.is_map()));
}
