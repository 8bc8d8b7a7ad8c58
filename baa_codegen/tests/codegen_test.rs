//! End-to-end back-end tests: optimized IR through instruction selection,
//! register allocation and emission.

use baa_codegen::compile_module;
use baa_ir::passes::{OutOfSsa, Pass};
use baa_ir::{IrBuilder, Module, OptLevel, Opcode, Optimizer, Type, Value};

fn optimize_and_lower(mut module: Module, level: OptLevel) -> String {
    let mut opt = Optimizer::new(level).with_verify_gate(true);
    opt.run(&mut module).unwrap();
    OutOfSsa.run(&mut module).unwrap();
    compile_module(&module).unwrap()
}

#[test]
fn folded_constant_return_emits_single_mov() {
    // main returns 5 + 3; after optimization only `mov $8, %rax` and the
    // epilogue remain in the text section.
    let mut b = IrBuilder::new("ثمانية");
    b.create_func("main", Type::I64);
    let entry = b.create_block("بداية");
    b.set_insert_point(entry);
    let sum = b.emit_binary(
        Opcode::Add,
        Type::I64,
        Value::const_int(5, Type::I64),
        Value::const_int(3, Type::I64),
    );
    b.emit_ret(Some(Value::reg(sum, Type::I64)));

    let asm = optimize_and_lower(b.finish(), OptLevel::O2);

    assert!(asm.contains(".globl main"));
    assert!(asm.contains("mov $8, %rax"));
    let text_section = asm.split_once(".text").unwrap().1;
    assert!(!text_section.contains("add"));
    assert!(!text_section.contains("imul"));
    assert!(asm.contains("mov %rbp, %rsp\n    pop %rbp\n    ret"));
}

#[test]
fn diamond_compiles_after_out_of_ssa() {
    // A runtime-conditional diamond: the phi becomes edge copies and the
    // result still flows into rax before ret.
    let mut b = IrBuilder::new("معين");
    b.create_func("main", Type::I64);
    let p = b.add_param(None, Type::I64);
    let entry = b.create_block("بداية");
    let then_b = b.create_block("ثم");
    let else_b = b.create_block("وإلا");
    let merge = b.create_block("دمج");

    b.set_insert_point(entry);
    let ptr = b.emit_alloca(Type::I64);
    let ptr_val = || Value::reg(ptr, Type::I64.ptr_to());
    b.emit_store(Value::const_int(0, Type::I64), ptr_val());
    let c = b.emit_cmp(
        baa_ir::CmpPred::Gt,
        Value::reg(p, Type::I64),
        Value::const_int(0, Type::I64),
    );
    b.emit_br_cond(Value::reg(c, Type::I1), then_b, else_b);

    b.set_insert_point(then_b);
    b.emit_store(Value::const_int(1, Type::I64), ptr_val());
    b.emit_br(merge);

    b.set_insert_point(else_b);
    b.emit_store(Value::const_int(2, Type::I64), ptr_val());
    b.emit_br(merge);

    b.set_insert_point(merge);
    let x = b.emit_load(Type::I64, ptr_val());
    b.emit_ret(Some(Value::reg(x, Type::I64)));

    let asm = optimize_and_lower(b.finish(), OptLevel::O1);

    assert!(asm.contains("setg %al"));
    assert!(asm.contains("test %rax, %rax"));
    assert!(asm.contains("jne .Lblock_main_1"));
    // No virtual register names may survive allocation.
    assert!(!asm.contains("%v"));
}

#[test]
fn print_program_calls_printf() {
    let mut b = IrBuilder::new("طباعة");
    let s = b.intern_string("النتيجة");
    b.create_func("main", Type::I64);
    let entry = b.create_block("بداية");
    b.set_insert_point(entry);
    b.emit_call("اطبع", Type::Void, vec![Value::ConstStr { id: s }]);
    b.emit_call("اطبع", Type::Void, vec![Value::const_int(42, Type::I64)]);
    b.emit_ret(Some(Value::const_int(0, Type::I64)));

    let asm = optimize_and_lower(b.finish(), OptLevel::O1);

    assert!(asm.contains(".Lstr_0: .asciz \"النتيجة\""));
    assert!(asm.contains("lea fmt_str(%rip), %rcx"));
    assert!(asm.contains("lea fmt_int(%rip), %rcx"));
    assert!(asm.contains("mov $42, %rdx"));
    assert!(asm.contains("sub $32, %rsp"));
    assert!(asm.contains("call printf"));
}

#[test]
fn loop_program_compiles_with_back_edge() {
    // Sum 0..10 through a stack slot; mem2reg plus out-of-SSA leaves edge
    // copies and a conditional back edge.
    let mut b = IrBuilder::new("حلقة");
    b.create_func("main", Type::I64);
    let entry = b.create_block("بداية");
    let header = b.create_block("رأس");
    let body = b.create_block("جسم");
    let exit = b.create_block("خروج");

    b.set_insert_point(entry);
    let ptr = b.emit_alloca(Type::I64);
    let ptr_val = || Value::reg(ptr, Type::I64.ptr_to());
    b.emit_store(Value::const_int(0, Type::I64), ptr_val());
    b.emit_br(header);

    b.set_insert_point(header);
    let cur = b.emit_load(Type::I64, ptr_val());
    let c = b.emit_cmp(
        baa_ir::CmpPred::Lt,
        Value::reg(cur, Type::I64),
        Value::const_int(10, Type::I64),
    );
    b.emit_br_cond(Value::reg(c, Type::I1), body, exit);

    b.set_insert_point(body);
    let next = b.emit_binary(
        Opcode::Add,
        Type::I64,
        Value::reg(cur, Type::I64),
        Value::const_int(1, Type::I64),
    );
    b.emit_store(Value::reg(next, Type::I64), ptr_val());
    b.emit_br(header);

    b.set_insert_point(exit);
    let last = b.emit_load(Type::I64, ptr_val());
    b.emit_ret(Some(Value::reg(last, Type::I64)));

    let asm = optimize_and_lower(b.finish(), OptLevel::O2);

    assert!(asm.contains("cmp $10, %rax"));
    assert!(asm.contains("setl %al"));
    assert!(!asm.contains("%v"));
    // The loop jumps backwards to one of main's block labels.
    assert!(asm.matches(".Lblock_main_").count() > 4);
}

#[test]
fn call_result_flows_through_rax() {
    let mut b = IrBuilder::new("نداءات");

    b.create_func("ضعف", Type::I64);
    let p = b.add_param(None, Type::I64);
    let entry = b.create_block("بداية");
    b.set_insert_point(entry);
    let d = b.emit_binary(
        Opcode::Mul,
        Type::I64,
        Value::reg(p, Type::I64),
        Value::const_int(2, Type::I64),
    );
    b.emit_ret(Some(Value::reg(d, Type::I64)));

    b.create_func("main", Type::I64);
    let entry = b.create_block("بداية");
    b.set_insert_point(entry);
    let r = b
        .emit_call("ضعف", Type::I64, vec![Value::const_int(21, Type::I64)])
        .unwrap();
    b.emit_ret(Some(Value::reg(r, Type::I64)));

    let asm = optimize_and_lower(b.finish(), OptLevel::O1);

    assert!(asm.contains("ضعف:"));
    assert!(asm.contains("mov $21, %rcx"));
    assert!(asm.contains("call ضعف"));
    // Both functions end with complete epilogues.
    assert_eq!(asm.matches("pop %rbp").count(), 2);
}
