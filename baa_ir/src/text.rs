//! Textual IR serialization
//!
//! A deterministic, line-oriented UTF-8 format covering every IR construct,
//! used for golden tests and IR diffing across pass boundaries. Writing is
//! canonical (blocks are renumbered in layout order), so
//! `write(read(write(m)))` equals `write(m)` byte for byte.

use crate::arena::BlockId;
use crate::function::Function;
use crate::instruction::{CmpPred, Inst, Opcode};
use crate::module::{Global, Module};
use crate::types::Type;
use crate::value::Value;
use baa_common::{BaaError, BaaResult};
use hashbrown::HashMap;
use std::fmt::Write as _;
use std::path::Path;

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialize a module to its canonical text form.
pub fn write_module(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module \"{}\"", escape(&module.name));

    for g in &module.globals {
        match &g.init {
            Some(init) => {
                let _ = writeln!(out, "global @{} : {} = {}", g.name, g.ty, plain_atom(init));
            }
            None => {
                let _ = writeln!(out, "global @{} : {}", g.name, g.ty);
            }
        }
    }

    for (id, s) in module.strings().enumerate() {
        let _ = writeln!(out, "string .Lstr_{} \"{}\"", id, escape(s));
    }

    for func in &module.functions {
        out.push('\n');
        write_function(&mut out, func);
    }

    out
}

pub fn write_module_file(module: &Module, path: &Path) -> BaaResult<()> {
    std::fs::write(path, write_module(module))?;
    Ok(())
}

fn signature(func: &Function) -> String {
    let params: Vec<String> = func
        .params
        .iter()
        .map(|p| format!("{} %{}", p.ty, p.reg))
        .collect();
    format!("@{}({}) -> {}", func.name, params.join(", "), func.ret_ty)
}

fn write_function(out: &mut String, func: &Function) {
    if func.is_prototype {
        let _ = writeln!(out, "declare {}", signature(func));
        return;
    }

    // Canonical block numbering: layout order.
    let serials: HashMap<BlockId, usize> = func
        .block_order
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i))
        .collect();

    let _ = writeln!(out, "func {} {{", signature(func));
    for &b in &func.block_order {
        let _ = writeln!(out, "block {}:", block_ref(func, &serials, b));
        for &i in &func.block(b).insts {
            let _ = writeln!(out, "    {}", render_inst(func, &serials, func.inst(i)));
        }
    }
    let _ = writeln!(out, "}}");
}

fn block_ref(func: &Function, serials: &HashMap<BlockId, usize>, b: BlockId) -> String {
    let serial = serials.get(&b).copied().unwrap_or(usize::MAX);
    format!("%{}_{}", func.block(b).label, serial)
}

/// Render a value that cannot be a block reference.
fn plain_atom(v: &Value) -> String {
    v.to_string()
}

fn atom(func: &Function, serials: &HashMap<BlockId, usize>, v: &Value) -> String {
    match v {
        Value::Block(b) => block_ref(func, serials, *b),
        other => other.to_string(),
    }
}

fn render_inst(func: &Function, serials: &HashMap<BlockId, usize>, inst: &Inst) -> String {
    let a = |i: usize| atom(func, serials, &inst.operands[i]);
    let dest = |body: String| match inst.dest {
        Some(d) => format!("%{} = {}", d, body),
        None => body,
    };

    match inst.op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::And
        | Opcode::Or => dest(format!("{} {} {}, {}", inst.op, inst.ty, a(0), a(1))),
        Opcode::Neg | Opcode::Not => dest(format!("{} {} {}", inst.op, inst.ty, a(0))),
        Opcode::Cmp => {
            let pred = inst.cmp_pred.map(|p| p.mnemonic()).unwrap_or("??");
            dest(format!(
                "cmp {} {} {}, {}",
                pred,
                inst.operands[0].ty(),
                a(0),
                a(1)
            ))
        }
        Opcode::Copy => dest(format!("copy {} {}", inst.ty, a(0))),
        Opcode::Alloca => {
            let pointee = inst.ty.pointee().cloned().unwrap_or(Type::Void);
            dest(format!("alloca {}", pointee))
        }
        Opcode::Load => dest(format!("load {} {}", inst.ty, a(0))),
        Opcode::Store => format!("store {} {}, {}", inst.operands[0].ty(), a(0), a(1)),
        Opcode::Br => format!("br {}", a(0)),
        Opcode::BrCond => format!("br_cond i1 {}, {}, {}", a(0), a(1), a(2)),
        Opcode::Ret => match inst.operands.first() {
            Some(v) => format!("ret {} {}", v.ty(), atom(func, serials, v)),
            None => "ret void".to_owned(),
        },
        Opcode::Call => {
            let call = inst.call.as_ref();
            let target = call.map(|c| c.target.as_str()).unwrap_or("??");
            let args: Vec<String> = call
                .map(|c| {
                    c.args
                        .iter()
                        .map(|arg| format!("{} {}", arg.ty(), atom(func, serials, arg)))
                        .collect()
                })
                .unwrap_or_default();
            dest(format!("call {} @{}({})", inst.ty, target, args.join(", ")))
        }
        Opcode::Phi => {
            let entries: Vec<String> = inst
                .phi_entries
                .iter()
                .map(|e| {
                    format!(
                        "[ {}, {} ]",
                        atom(func, serials, &e.value),
                        block_ref(func, serials, e.block)
                    )
                })
                .collect();
            dest(format!("phi {} {}", inst.ty, entries.join(", ")))
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse a module from its text form.
pub fn read_module(text: &str) -> BaaResult<Module> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end()))
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();

    let mut pos = 0;

    let Some(&(ln, first)) = lines.first() else {
        return Err(BaaError::text(1, "ملف IR فارغ"));
    };
    let name = first
        .strip_prefix("module \"")
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| BaaError::text(ln, "سطر module مفقود أو غير صالح"))?;
    let mut module = Module::new(unescape(name, ln)?);
    pos += 1;

    while pos < lines.len() {
        let (ln, line) = lines[pos];
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("global @") {
            parse_global(&mut module, rest, ln)?;
            pos += 1;
        } else if let Some(rest) = trimmed.strip_prefix("string .Lstr_") {
            parse_string(&mut module, rest, ln)?;
            pos += 1;
        } else if let Some(rest) = trimmed.strip_prefix("declare ") {
            let (func, _) = parse_signature(rest, ln)?;
            let mut func = func;
            func.is_prototype = true;
            module.add_function(func);
            pos += 1;
        } else if let Some(rest) = trimmed.strip_prefix("func ") {
            let header = rest
                .strip_suffix('{')
                .map(str::trim_end)
                .ok_or_else(|| BaaError::text(ln, "سطر func بدون '{'"))?;
            let (func, mut max_reg) = parse_signature(header, ln)?;
            let mut func = func;

            // Collect the body up to the closing brace.
            let mut body: Vec<(usize, &str)> = Vec::new();
            pos += 1;
            loop {
                let Some(&(ln2, line2)) = lines.get(pos) else {
                    return Err(BaaError::text(ln, "نهاية دالة مفقودة ('}')"));
                };
                pos += 1;
                if line2.trim() == "}" {
                    break;
                }
                body.push((ln2, line2));
            }

            parse_body(&mut func, &body, &mut max_reg)?;
            func.next_reg = func.next_reg.max(max_reg);
            module.add_function(func);
        } else {
            return Err(BaaError::text(ln, format!("سطر غير معروف: {}", trimmed)));
        }
    }

    Ok(module)
}

pub fn read_module_file(path: &Path) -> BaaResult<Module> {
    let text = std::fs::read_to_string(path)?;
    read_module(&text)
}

fn parse_global(module: &mut Module, rest: &str, ln: usize) -> BaaResult<()> {
    let (name, rest) = rest
        .split_once(" : ")
        .ok_or_else(|| BaaError::text(ln, "سطر global غير صالح"))?;
    let (ty_str, init_str) = match rest.split_once(" = ") {
        Some((t, i)) => (t, Some(i)),
        None => (rest, None),
    };
    let ty = parse_type(ty_str, ln)?;
    let mut global = Global::new(name, ty.clone());
    if let Some(init) = init_str {
        global.init = Some(parse_atom(init, &ty, None, ln)?);
    }
    module.add_global(global);
    Ok(())
}

fn parse_string(module: &mut Module, rest: &str, ln: usize) -> BaaResult<()> {
    let (id_str, quoted) = rest
        .split_once(' ')
        .ok_or_else(|| BaaError::text(ln, "سطر string غير صالح"))?;
    let id: u32 = id_str
        .parse()
        .map_err(|_| BaaError::text(ln, "معرف نص غير صالح"))?;
    let content = quoted
        .strip_prefix('"')
        .and_then(|q| q.strip_suffix('"'))
        .ok_or_else(|| BaaError::text(ln, "نص بدون علامتي اقتباس"))?;
    let interned = module.intern_string(&unescape(content, ln)?);
    if interned != id {
        return Err(BaaError::text(
            ln,
            format!("معرف النص {} لا يطابق ترتيب الجدول {}", id, interned),
        ));
    }
    Ok(())
}

/// Parse `@name(ty %r, ...) -> ty`; returns the function and one past the
/// highest parameter register.
fn parse_signature(s: &str, ln: usize) -> BaaResult<(Function, u32)> {
    let s = s
        .strip_prefix('@')
        .ok_or_else(|| BaaError::text(ln, "توقيع دالة بدون '@'"))?;
    let (name, rest) = s
        .split_once('(')
        .ok_or_else(|| BaaError::text(ln, "توقيع دالة بدون '('"))?;
    let (params_str, ret_str) = rest
        .rsplit_once(") -> ")
        .ok_or_else(|| BaaError::text(ln, "توقيع دالة بدون نوع رجوع"))?;

    let ret_ty = parse_type(ret_str.trim(), ln)?;
    let mut func = Function::new(name, ret_ty);

    let mut max_reg = 0;
    if !params_str.trim().is_empty() {
        for param in params_str.split(", ") {
            let (ty_str, reg_str) = param
                .rsplit_once(' ')
                .ok_or_else(|| BaaError::text(ln, "معامل دالة غير صالح"))?;
            let ty = parse_type(ty_str, ln)?;
            let reg = parse_reg(reg_str, ln)?;
            let assigned = func.add_param(None, ty);
            if assigned != reg {
                return Err(BaaError::text(
                    ln,
                    format!("سجل معامل {} خارج الترتيب (المتوقع {})", reg, assigned),
                ));
            }
            max_reg = max_reg.max(reg + 1);
        }
    }
    Ok((func, max_reg))
}

fn parse_body(
    func: &mut Function,
    body: &[(usize, &str)],
    max_reg: &mut u32,
) -> BaaResult<()> {
    // First pass: create the blocks so forward branch references resolve.
    let mut blocks: Vec<BlockId> = Vec::new();
    for &(ln, line) in body {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("block %") {
            let header = rest
                .strip_suffix(':')
                .ok_or_else(|| BaaError::text(ln, "سطر block بدون ':'"))?;
            let (label, serial_str) = header
                .rsplit_once('_')
                .ok_or_else(|| BaaError::text(ln, "اسم كتلة بدون رقم"))?;
            let serial: usize = serial_str
                .parse()
                .map_err(|_| BaaError::text(ln, "رقم كتلة غير صالح"))?;
            if serial != blocks.len() {
                return Err(BaaError::text(
                    ln,
                    format!("رقم كتلة {} خارج الترتيب (المتوقع {})", serial, blocks.len()),
                ));
            }
            blocks.push(func.new_block(Some(label)));
        }
    }

    // Second pass: parse the instructions into their blocks.
    let mut current: Option<BlockId> = None;
    let mut next_block = 0usize;
    for &(ln, line) in body {
        let trimmed = line.trim();
        if trimmed.starts_with("block %") {
            current = Some(blocks[next_block]);
            next_block += 1;
            continue;
        }
        let block = current.ok_or_else(|| BaaError::text(ln, "تعليمة خارج أي كتلة"))?;
        let inst = parse_inst(trimmed, &blocks, max_reg, ln)?;
        func.append_inst(block, inst);
    }
    Ok(())
}

fn parse_reg(s: &str, ln: usize) -> BaaResult<u32> {
    s.strip_prefix('%')
        .and_then(|r| r.parse().ok())
        .ok_or_else(|| BaaError::text(ln, format!("سجل غير صالح: {}", s)))
}

fn parse_block_ref(s: &str, blocks: &[BlockId], ln: usize) -> BaaResult<BlockId> {
    let serial = s
        .strip_prefix('%')
        .and_then(|r| r.rsplit_once('_'))
        .and_then(|(_, serial)| serial.parse::<usize>().ok())
        .ok_or_else(|| BaaError::text(ln, format!("مرجع كتلة غير صالح: {}", s)))?;
    blocks
        .get(serial)
        .copied()
        .ok_or_else(|| BaaError::text(ln, format!("مرجع كتلة خارج النطاق: {}", s)))
}

/// Parse one value atom with its expected type from context.
fn parse_atom(
    s: &str,
    expected: &Type,
    blocks: Option<&[BlockId]>,
    ln: usize,
) -> BaaResult<Value> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix(".Lstr_") {
        let id = rest
            .parse()
            .map_err(|_| BaaError::text(ln, format!("مرجع نص غير صالح: {}", s)))?;
        return Ok(Value::ConstStr { id });
    }
    if let Some(rest) = s.strip_prefix('@') {
        return Ok(match expected.pointee() {
            Some(pointee) => Value::Global { name: rest.to_owned(), pointee: pointee.clone() },
            None => Value::FuncRef { name: rest.to_owned(), ty: expected.clone() },
        });
    }
    if let Some(rest) = s.strip_prefix('%') {
        if rest.bytes().all(|b| b.is_ascii_digit()) {
            let num = rest
                .parse()
                .map_err(|_| BaaError::text(ln, format!("سجل غير صالح: {}", s)))?;
            return Ok(Value::Reg { num, ty: expected.clone() });
        }
        let Some(blocks) = blocks else {
            return Err(BaaError::text(ln, format!("مرجع كتلة غير متوقع: {}", s)));
        };
        return Ok(Value::Block(parse_block_ref(s, blocks, ln)?));
    }
    let value: i64 = s
        .parse()
        .map_err(|_| BaaError::text(ln, format!("قيمة غير صالحة: {}", s)))?;
    Ok(Value::ConstInt { value, ty: expected.clone() })
}

fn note_reg(v: &Value, max_reg: &mut u32) {
    if let Value::Reg { num, .. } = v {
        *max_reg = (*max_reg).max(num + 1);
    }
}

fn parse_inst(
    line: &str,
    blocks: &[BlockId],
    max_reg: &mut u32,
    ln: usize,
) -> BaaResult<Inst> {
    let (dest, rest) = match line.split_once(" = ") {
        Some((d, rest)) if d.starts_with('%') => (Some(parse_reg(d, ln)?), rest),
        _ => (None, line),
    };
    if let Some(d) = dest {
        *max_reg = (*max_reg).max(d + 1);
    }

    let (op_str, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();

    let need_dest = |ln: usize| -> BaaResult<u32> {
        dest.ok_or_else(|| BaaError::text(ln, "تعليمة منتجة لقيمة بدون وجهة"))
    };

    let two_typed = |args: &str, ln: usize| -> BaaResult<(Type, Value, Value)> {
        let (ty_str, ops) = args
            .split_once(' ')
            .ok_or_else(|| BaaError::text(ln, "معاملات ناقصة"))?;
        let ty = parse_type(ty_str, ln)?;
        let (a, b) = ops
            .split_once(", ")
            .ok_or_else(|| BaaError::text(ln, "معاملان متوقعان"))?;
        let va = parse_atom(a, &ty, Some(blocks), ln)?;
        let vb = parse_atom(b, &ty, Some(blocks), ln)?;
        Ok((ty, va, vb))
    };

    let inst = match op_str {
        "add" | "sub" | "mul" | "div" | "mod" | "and" | "or" => {
            let op = match op_str {
                "add" => Opcode::Add,
                "sub" => Opcode::Sub,
                "mul" => Opcode::Mul,
                "div" => Opcode::Div,
                "mod" => Opcode::Mod,
                "and" => Opcode::And,
                _ => Opcode::Or,
            };
            let (ty, a, b) = two_typed(args, ln)?;
            note_reg(&a, max_reg);
            note_reg(&b, max_reg);
            Inst::binary(op, ty, need_dest(ln)?, a, b)
        }
        "neg" | "not" => {
            let op = if op_str == "neg" { Opcode::Neg } else { Opcode::Not };
            let (ty_str, operand) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "معامل ناقص"))?;
            let ty = parse_type(ty_str, ln)?;
            let v = parse_atom(operand, &ty, Some(blocks), ln)?;
            note_reg(&v, max_reg);
            Inst::unary(op, ty, need_dest(ln)?, v)
        }
        "cmp" => {
            let (pred_str, rest) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "محمول مقارنة مفقود"))?;
            let pred = CmpPred::from_mnemonic(pred_str)
                .ok_or_else(|| BaaError::text(ln, format!("محمول غير معروف: {}", pred_str)))?;
            let (_, a, b) = two_typed(rest, ln)?;
            note_reg(&a, max_reg);
            note_reg(&b, max_reg);
            Inst::cmp(pred, need_dest(ln)?, a, b)
        }
        "copy" => {
            let (ty_str, operand) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "معامل نسخ ناقص"))?;
            let ty = parse_type(ty_str, ln)?;
            let v = parse_atom(operand, &ty, Some(blocks), ln)?;
            note_reg(&v, max_reg);
            Inst::copy(ty, need_dest(ln)?, v)
        }
        "alloca" => {
            let pointee = parse_type(args, ln)?;
            Inst::alloca(pointee, need_dest(ln)?)
        }
        "load" => {
            let (ty_str, ptr) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "معامل حمل ناقص"))?;
            let ty = parse_type(ty_str, ln)?;
            let p = parse_atom(ptr, &ty.clone().ptr_to(), Some(blocks), ln)?;
            note_reg(&p, max_reg);
            Inst::load(ty, need_dest(ln)?, p)
        }
        "store" => {
            let (ty_str, ops) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "معاملا خزن ناقصان"))?;
            let ty = parse_type(ty_str, ln)?;
            let (v, p) = ops
                .split_once(", ")
                .ok_or_else(|| BaaError::text(ln, "معاملا خزن متوقعان"))?;
            let value = parse_atom(v, &ty, Some(blocks), ln)?;
            let ptr = parse_atom(p, &ty.clone().ptr_to(), Some(blocks), ln)?;
            note_reg(&value, max_reg);
            note_reg(&ptr, max_reg);
            Inst::store(value, ptr)
        }
        "br" => Inst::br(parse_block_ref(args, blocks, ln)?),
        "br_cond" => {
            let (ty_str, ops) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "معاملات قفز_شرط ناقصة"))?;
            let ty = parse_type(ty_str, ln)?;
            let parts: Vec<&str> = ops.split(", ").collect();
            if parts.len() != 3 {
                return Err(BaaError::text(ln, "قفز_شرط يتطلب ثلاثة معاملات"));
            }
            let cond = parse_atom(parts[0], &ty, Some(blocks), ln)?;
            note_reg(&cond, max_reg);
            let t = parse_block_ref(parts[1], blocks, ln)?;
            let f = parse_block_ref(parts[2], blocks, ln)?;
            Inst::br_cond(cond, t, f)
        }
        "ret" => {
            if args == "void" {
                Inst::ret(None)
            } else {
                let (ty_str, v) = args
                    .split_once(' ')
                    .ok_or_else(|| BaaError::text(ln, "قيمة رجوع ناقصة"))?;
                let ty = parse_type(ty_str, ln)?;
                let value = parse_atom(v, &ty, Some(blocks), ln)?;
                note_reg(&value, max_reg);
                Inst::ret(Some(value))
            }
        }
        "call" => {
            let (ty_str, rest) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "نداء ناقص"))?;
            let ty = parse_type(ty_str, ln)?;
            let rest = rest
                .strip_prefix('@')
                .ok_or_else(|| BaaError::text(ln, "هدف نداء بدون '@'"))?;
            let (name, args_str) = rest
                .split_once('(')
                .ok_or_else(|| BaaError::text(ln, "نداء بدون '('"))?;
            let args_str = args_str
                .strip_suffix(')')
                .ok_or_else(|| BaaError::text(ln, "نداء بدون ')'"))?;

            let mut call_args = Vec::new();
            if !args_str.trim().is_empty() {
                for part in args_str.split(", ") {
                    let (aty_str, atom_str) = part
                        .split_once(' ')
                        .ok_or_else(|| BaaError::text(ln, "وسيط نداء غير صالح"))?;
                    let aty = parse_type(aty_str, ln)?;
                    let v = parse_atom(atom_str, &aty, Some(blocks), ln)?;
                    note_reg(&v, max_reg);
                    call_args.push(v);
                }
            }
            Inst::call(name, ty, dest, call_args)
        }
        "phi" => {
            let (ty_str, entries_str) = args
                .split_once(' ')
                .ok_or_else(|| BaaError::text(ln, "فاي بدون مداخل"))?;
            let ty = parse_type(ty_str, ln)?;
            let mut phi = Inst::phi(ty.clone(), need_dest(ln)?);

            let body = entries_str
                .strip_prefix("[ ")
                .and_then(|s| s.strip_suffix(" ]"))
                .ok_or_else(|| BaaError::text(ln, "مداخل فاي غير صالحة"))?;
            for entry in body.split(" ], [ ") {
                let (v, b) = entry
                    .split_once(", ")
                    .ok_or_else(|| BaaError::text(ln, "مدخل فاي غير صالح"))?;
                let value = parse_atom(v, &ty, Some(blocks), ln)?;
                note_reg(&value, max_reg);
                let block = parse_block_ref(b, blocks, ln)?;
                phi.phi_add(value, block);
            }
            phi
        }
        other => {
            return Err(BaaError::text(ln, format!("تعليمة غير معروفة: {}", other)));
        }
    };
    Ok(inst)
}

fn parse_type(s: &str, ln: usize) -> BaaResult<Type> {
    let s = s.trim();
    match s {
        "void" => return Ok(Type::Void),
        "i1" => return Ok(Type::I1),
        "i8" => return Ok(Type::I8),
        "i16" => return Ok(Type::I16),
        "i32" => return Ok(Type::I32),
        "i64" => return Ok(Type::I64),
        _ => {}
    }
    if let Some(inner) = s.strip_prefix("ptr<").and_then(|r| r.strip_suffix('>')) {
        return Ok(parse_type(inner, ln)?.ptr_to());
    }
    if let Some(inner) = s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
        let (elem, len) = inner
            .rsplit_once(", ")
            .ok_or_else(|| BaaError::text(ln, format!("نوع مصفوفة غير صالح: {}", s)))?;
        let len: u64 = len
            .parse()
            .map_err(|_| BaaError::text(ln, format!("طول مصفوفة غير صالح: {}", s)))?;
        return Ok(Type::Array { elem: Box::new(parse_type(elem, ln)?), len });
    }
    if let Some(inner) = s.strip_prefix("func(") {
        let (params_str, ret_str) = inner
            .rsplit_once(") -> ")
            .ok_or_else(|| BaaError::text(ln, format!("نوع دالة غير صالح: {}", s)))?;
        let mut params = Vec::new();
        if !params_str.trim().is_empty() {
            for p in params_str.split(", ") {
                params.push(parse_type(p, ln)?);
            }
        }
        return Ok(Type::Func { params, ret: Box::new(parse_type(ret_str, ln)?) });
    }
    Err(BaaError::text(ln, format!("نوع غير معروف: {}", s)))
}

fn unescape(s: &str, ln: usize) -> BaaResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            other => {
                return Err(BaaError::text(
                    ln,
                    format!("تسلسل هروب غير معروف: \\{}", other.unwrap_or(' ')),
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use pretty_assertions::assert_eq;

    fn sample_module() -> Module {
        let mut b = IrBuilder::new("عينة");
        let s0 = b.intern_string("مرحبا \"باء\"\n");
        b.module_mut()
            .add_global(Global::new("ع", Type::I64).with_init(Value::const_int(7, Type::I64)));

        b.create_func("جمع", Type::I64);
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

        b.create_func("الرئيسية", Type::I64);
        let entry = b.create_block("بداية");
        let then_b = b.create_block("ثم");
        let else_b = b.create_block("وإلا");
        let merge = b.create_block("دمج");

        b.set_insert_point(entry);
        let c = b.emit_cmp(
            CmpPred::Gt,
            Value::const_int(2, Type::I64),
            Value::const_int(1, Type::I64),
        );
        b.emit_br_cond(Value::reg(c, Type::I1), then_b, else_b);

        b.set_insert_point(then_b);
        let a = b.emit_call("جمع", Type::I64, vec![Value::const_int(1, Type::I64)]).unwrap();
        b.emit_br(merge);

        b.set_insert_point(else_b);
        let bb = b.emit_call("جمع", Type::I64, vec![Value::const_int(2, Type::I64)]).unwrap();
        b.emit_br(merge);

        let (phi, phi_reg) = b.emit_phi(merge, Type::I64);
        b.phi_add_incoming(phi, Value::reg(a, Type::I64), then_b);
        b.phi_add_incoming(phi, Value::reg(bb, Type::I64), else_b);
        b.set_insert_point(merge);
        b.emit_call("اطبع", Type::Void, vec![Value::ConstStr { id: s0 }]);
        b.emit_ret(Some(Value::reg(phi_reg, Type::I64)));

        let mut proto = Function::new_prototype("اطبع", Type::Void);
        proto.add_param(None, Type::I8.ptr_to());
        b.module_mut().add_function(proto);

        b.finish()
    }

    #[test]
    fn test_written_form_is_stable() {
        let m = sample_module();
        let text = write_module(&m);

        assert!(text.starts_with("module \"عينة\"\n"));
        assert!(text.contains("global @ع : i64 = 7\n"));
        assert!(text.contains("string .Lstr_0 \"مرحبا \\\"باء\\\"\\n\"\n"));
        assert!(text.contains("func @جمع(i64 %0) -> i64 {\n"));
        assert!(text.contains("block %بداية_0:\n"));
        assert!(text.contains("    %1 = add i64 %0, 1\n"));
        assert!(text.contains("    ret i64 %1\n"));
        assert!(text.contains("    %0 = cmp gt i64 2, 1\n"));
        assert!(text.contains("    br_cond i1 %0, %ثم_1, %وإلا_2\n"));
        assert!(text.contains("phi i64 [ %1, %ثم_1 ], [ %2, %وإلا_2 ]\n"));
        assert!(text.contains("    call void @اطبع(ptr<i8> .Lstr_0)\n"));
        assert!(text.contains("declare @اطبع(ptr<i8> %0) -> void\n"));
    }

    #[test]
    fn test_round_trip_byte_equality() {
        let m = sample_module();
        let first = write_module(&m);
        let reread = read_module(&first).unwrap();
        let second = write_module(&reread);
        assert_eq!(first, second);
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let m = sample_module();
        let text = write_module(&m);
        let reread = read_module(&text).unwrap();

        assert_eq!(reread.name, "عينة");
        assert_eq!(reread.globals.len(), 1);
        assert_eq!(reread.string(0), Some("مرحبا \"باء\"\n"));
        assert_eq!(reread.functions.len(), 3);

        let main = reread.function("الرئيسية").unwrap();
        assert_eq!(main.block_count(), 4);
        assert!(main.next_reg >= 4);

        let proto = reread.function("اطبع").unwrap();
        assert!(proto.is_prototype);
        assert_eq!(proto.params.len(), 1);
    }

    #[test]
    fn test_alloca_and_memory_round_trip() {
        let mut b = IrBuilder::new("ذاكرة");
        b.create_func("د", Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let ptr = b.emit_alloca(Type::I64);
        let ptr_val = || Value::reg(ptr, Type::I64.ptr_to());
        b.emit_store(Value::const_int(5, Type::I64), ptr_val());
        let x = b.emit_load(Type::I64, ptr_val());
        b.emit_ret(Some(Value::reg(x, Type::I64)));
        let m = b.finish();

        let text = write_module(&m);
        assert!(text.contains("    %0 = alloca i64\n"));
        assert!(text.contains("    store i64 5, %0\n"));
        assert!(text.contains("    %1 = load i64 %0\n"));

        let reread = read_module(&text).unwrap();
        assert_eq!(write_module(&reread), text);
    }

    #[test]
    fn test_malformed_input_reports_line() {
        let err = read_module("module \"م\"\nglobal بلا_صيغة\n").unwrap_err();
        match err {
            BaaError::TextError { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_instruction_rejected() {
        let text = "module \"م\"\n\nfunc @د() -> i64 {\nblock %ب_0:\n    zzz i64 1\n}\n";
        assert!(read_module(text).is_err());
    }
}
