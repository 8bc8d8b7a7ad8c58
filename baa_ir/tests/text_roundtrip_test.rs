//! Text IR golden and file round-trip tests

use baa_ir::passes::{Mem2Reg, Pass};
use baa_ir::{text, CmpPred, IrBuilder, Module, Opcode, Type, Value};
use pretty_assertions::assert_eq;

/// A module exercising every construct the format covers: globals, interned
/// strings, prototypes, memory, comparisons, calls, branches and phis.
fn full_module() -> Module {
    let mut b = IrBuilder::new("شاملة");
    let s = b.intern_string("مرحبا \"باء\"\n");
    b.module_mut().add_global(
        baa_ir::Global::new("عداد", Type::I64).with_init(Value::const_int(7, Type::I64)),
    );

    b.create_func("قيمة_مطلقة", Type::I64);
    let p = b.add_param(None, Type::I64);
    let entry = b.create_block("بداية");
    let neg_b = b.create_block("سالب");
    let pos_b = b.create_block("موجب");

    b.set_insert_point(entry);
    let c = b.emit_cmp(CmpPred::Lt, Value::reg(p, Type::I64), Value::const_int(0, Type::I64));
    b.emit_br_cond(Value::reg(c, Type::I1), neg_b, pos_b);

    b.set_insert_point(neg_b);
    let n = b.emit_unary(Opcode::Neg, Type::I64, Value::reg(p, Type::I64));
    b.emit_ret(Some(Value::reg(n, Type::I64)));

    b.set_insert_point(pos_b);
    b.emit_ret(Some(Value::reg(p, Type::I64)));

    b.create_func("الرئيسية", Type::I64);
    let entry = b.create_block("بداية");
    b.set_insert_point(entry);
    let ptr = b.emit_alloca(Type::I64);
    let ptr_val = || Value::reg(ptr, Type::I64.ptr_to());
    b.emit_store(Value::const_int(-5, Type::I64), ptr_val());
    let x = b.emit_load(Type::I64, ptr_val());
    let r = b
        .emit_call("قيمة_مطلقة", Type::I64, vec![Value::reg(x, Type::I64)])
        .unwrap();
    b.emit_call("اطبع", Type::Void, vec![Value::ConstStr { id: s }]);
    b.emit_ret(Some(Value::reg(r, Type::I64)));

    let mut proto = baa_ir::Function::new_prototype("اطبع", Type::Void);
    proto.add_param(None, Type::I8.ptr_to());
    b.module_mut().add_function(proto);

    b.finish()
}

#[test]
fn round_trip_is_byte_identical() {
    let m = full_module();
    let first = text::write_module(&m);
    let reread = text::read_module(&first).unwrap();
    let second = text::write_module(&reread);
    assert_eq!(first, second);
}

#[test]
fn round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = dir.path().join("أول.ir");
    let p2 = dir.path().join("ثان.ir");

    let m = full_module();
    text::write_module_file(&m, &p1).unwrap();
    let reread = text::read_module_file(&p1).unwrap();
    text::write_module_file(&reread, &p2).unwrap();

    let t1 = std::fs::read_to_string(&p1).unwrap();
    let t2 = std::fs::read_to_string(&p2).unwrap();
    assert_eq!(t1, t2);
}

#[test]
fn round_trip_survives_optimization() {
    // A module that went through SSA construction still serializes
    // deterministically, phis included.
    let mut b = IrBuilder::new("محسنة");
    b.create_func("الرئيسية", Type::I64);
    let entry = b.create_block("بداية");
    let then_b = b.create_block("ثم");
    let else_b = b.create_block("وإلا");
    let merge = b.create_block("دمج");

    b.set_insert_point(entry);
    let ptr = b.emit_alloca(Type::I64);
    let ptr_val = || Value::reg(ptr, Type::I64.ptr_to());
    b.emit_store(Value::const_int(0, Type::I64), ptr_val());
    b.emit_br_cond(Value::const_int(1, Type::I1), then_b, else_b);
    b.set_insert_point(then_b);
    b.emit_store(Value::const_int(1, Type::I64), ptr_val());
    b.emit_br(merge);
    b.set_insert_point(else_b);
    b.emit_store(Value::const_int(2, Type::I64), ptr_val());
    b.emit_br(merge);
    b.set_insert_point(merge);
    let x = b.emit_load(Type::I64, ptr_val());
    b.emit_ret(Some(Value::reg(x, Type::I64)));
    let mut m = b.finish();

    Mem2Reg.run(&mut m).unwrap();

    let first = text::write_module(&m);
    assert!(first.contains("phi i64 [ 1, %ثم_1 ], [ 2, %وإلا_2 ]"));

    let reread = text::read_module(&first).unwrap();
    let second = text::write_module(&reread);
    assert_eq!(first, second);
}

#[test]
fn golden_format_snapshot() {
    let mut b = IrBuilder::new("ذهبية");
    b.module_mut().add_global(
        baa_ir::Global::new("ع", Type::I64).with_init(Value::const_int(7, Type::I64)),
    );
    b.create_func("جمع_واحد", Type::I64);
    let p = b.add_param(None, Type::I64);
    let entry = b.create_block("بداية");
    b.set_insert_point(entry);
    let r = b.emit_binary(
        Opcode::Add,
        Type::I64,
        Value::reg(p, Type::I64),
        Value::const_int(1, Type::I64),
    );
    b.emit_ret(Some(Value::reg(r, Type::I64)));
    let m = b.finish();

    let expected = "\
module \"ذهبية\"
global @ع : i64 = 7

func @جمع_واحد(i64 %0) -> i64 {
block %بداية_0:
    %1 = add i64 %0, 1
    ret i64 %1
}
";
    assert_eq!(text::write_module(&m), expected);
}

#[test]
fn parse_rejects_garbage() {
    assert!(text::read_module("").is_err());
    assert!(text::read_module("وحدة بلا ترويسة").is_err());
    assert!(text::read_module("module \"م\"\nfunc @د() -> i64 {\n").is_err());
}
