//! AST to IR lowering
//!
//! Locals live in stack slots (alloca + load/store) and are promoted to SSA
//! registers by mem2reg. Control flow lowers to explicit CFG blocks; logical
//! operators short-circuit; boolean values materialize as 0/1 through a
//! small diamond that the optimizer collapses. The entry function
//! `الرئيسية` is emitted as `main`; `اطبع` stays a call to the print
//! intrinsic the back-end expands.

use crate::arena::BlockId;
use crate::builder::IrBuilder;
use crate::instruction::{CmpPred, Opcode};
use crate::module::{Global, Module};
use crate::types::Type;
use crate::value::Value;
use baa_ast::{BinOp, Decl, Expr, Program, Stmt, UnaryOp};
use baa_common::{BaaError, BaaResult};
use hashbrown::{HashMap, HashSet};

/// The source-language entry point and the symbol it compiles to.
pub const ENTRY_FUNC: &str = "الرئيسية";
pub const PRINT_INTRINSIC: &str = "اطبع";

/// Lower a program to an IR module.
pub fn lower_program(program: &Program) -> BaaResult<Module> {
    let mut lo = Lowerer {
        b: IrBuilder::new(program.source_name.clone()),
        scopes: Vec::new(),
        globals: HashSet::new(),
    };

    for decl in &program.declarations {
        if let Decl::GlobalVar { name, init, line, col } = decl {
            let mut global = Global::new(name.clone(), Type::I64);
            match init {
                None => {}
                Some(Expr::Int { value, .. }) => {
                    global.init = Some(Value::const_int(*value, Type::I64));
                }
                Some(_) => {
                    return Err(BaaError::lowering(format!(
                        "مهيئ المتغير العام '{}' ليس ثابتاً عند {}:{}",
                        name, line, col
                    )));
                }
            }
            lo.b.module_mut().add_global(global);
            lo.globals.insert(name.clone());
        }
    }

    for decl in &program.declarations {
        if let Decl::FuncDef { name, params, body, .. } = decl {
            lo.lower_function(name, params, body)?;
        }
    }

    let mut module = lo.b.finish();
    add_missing_prototypes(&mut module);
    Ok(module)
}

/// Declare a prototype for every called function the module does not
/// define, so call signatures stay checkable. The print intrinsic belongs
/// to the back-end and is left undeclared.
fn add_missing_prototypes(module: &mut Module) {
    let defined: HashSet<String> = module.functions.iter().map(|f| f.name.clone()).collect();
    let mut missing: Vec<(String, usize)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for func in &module.functions {
        for &b in &func.block_order {
            for &i in &func.block(b).insts {
                let Some(call) = &func.inst(i).call else { continue };
                if call.target == PRINT_INTRINSIC
                    || defined.contains(&call.target)
                    || !seen.insert(call.target.clone())
                {
                    continue;
                }
                missing.push((call.target.clone(), call.args.len()));
            }
        }
    }

    for (name, arity) in missing {
        let mut proto = crate::function::Function::new_prototype(name, Type::I64);
        for _ in 0..arity {
            proto.add_param(None, Type::I64);
        }
        module.add_function(proto);
    }
}

struct Lowerer {
    b: IrBuilder,
    /// Innermost scope last; values are alloca pointer registers.
    scopes: Vec<HashMap<String, u32>>,
    globals: HashSet<String>,
}

impl Lowerer {
    fn lower_function(&mut self, name: &str, params: &[baa_ast::Param], body: &Stmt) -> BaaResult<()> {
        let symbol = if name == ENTRY_FUNC { "main" } else { name };
        self.b.create_func(symbol, Type::I64);

        let mut param_regs = Vec::new();
        for p in params {
            param_regs.push((p.name.clone(), self.b.add_param(Some(&p.name), Type::I64)));
        }

        let entry = self.b.create_block("بداية");
        self.b.set_insert_point(entry);

        // Spill parameters into slots so assignment works uniformly;
        // mem2reg promotes them back.
        self.scopes.push(HashMap::new());
        for (pname, reg) in param_regs {
            let ptr = self.b.emit_alloca(Type::I64);
            self.b.emit_store(Value::reg(reg, Type::I64), self.ptr_value(ptr));
            self.scope_insert(pname, ptr);
        }

        self.lower_stmt(body)?;

        if !self.b.block_terminated() {
            self.b.emit_ret(Some(Value::const_int(0, Type::I64)));
        }
        self.scopes.pop();
        Ok(())
    }

    fn ptr_value(&self, reg: u32) -> Value {
        Value::reg(reg, Type::I64.ptr_to())
    }

    fn scope_insert(&mut self, name: String, ptr: u32) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, ptr);
        }
    }

    fn lookup_local(&self, name: &str) -> Option<u32> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    /// The pointer value of a variable: local slot first, then global.
    fn lookup_ptr(&self, name: &str, line: u32, col: u32) -> BaaResult<Value> {
        if let Some(ptr) = self.lookup_local(name) {
            return Ok(self.ptr_value(ptr));
        }
        if self.globals.contains(name) {
            return Ok(Value::Global { name: name.to_owned(), pointee: Type::I64 });
        }
        Err(BaaError::lowering(format!(
            "متغير غير معروف '{}' عند {}:{}",
            name, line, col
        )))
    }

    /// Start a fresh block when the current one is already terminated, so
    /// statements after a return stay well-formed (they are unreachable and
    /// removed by dead code elimination).
    fn ensure_open_block(&mut self) {
        if self.b.block_terminated() {
            let cont = self.b.create_block("تابع");
            self.b.set_insert_point(cont);
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> BaaResult<()> {
        self.ensure_open_block();
        match stmt {
            Stmt::Block { statements, .. } => {
                self.scopes.push(HashMap::new());
                for s in statements {
                    self.lower_stmt(s)?;
                }
                self.scopes.pop();
            }
            Stmt::VarDecl { name, init, .. } => {
                let value = self.lower_expr(init)?;
                let ptr = self.b.emit_alloca(Type::I64);
                self.b.emit_store(value, self.ptr_value(ptr));
                self.scope_insert(name.clone(), ptr);
            }
            Stmt::Assign { name, value, line, col } => {
                let value = self.lower_expr(value)?;
                let ptr = self.lookup_ptr(name, *line, *col)?;
                self.b.emit_store(value, ptr);
            }
            Stmt::CallStmt { name, args, .. } => {
                let args = self.lower_args(args)?;
                self.b.emit_call(name, Type::I64, args);
            }
            Stmt::Return { value, .. } => {
                let value = self.lower_expr(value)?;
                self.b.emit_ret(Some(value));
            }
            Stmt::Print { value, .. } => {
                let value = self.lower_expr(value)?;
                self.b.emit_call(PRINT_INTRINSIC, Type::Void, vec![value]);
            }
            Stmt::If { condition, then_branch, .. } => {
                let then_b = self.b.create_block("ثم");
                let end_b = self.b.create_block("نهاية_إذا");
                self.lower_condition(condition, then_b, end_b)?;

                self.b.set_insert_point(then_b);
                self.lower_stmt(then_branch)?;
                if !self.b.block_terminated() {
                    self.b.emit_br(end_b);
                }
                self.b.set_insert_point(end_b);
            }
            Stmt::While { condition, body, .. } => {
                let header = self.b.create_block("رأس_حلقة");
                let body_b = self.b.create_block("جسم_حلقة");
                let end_b = self.b.create_block("نهاية_حلقة");

                self.b.emit_br(header);
                self.b.set_insert_point(header);
                self.lower_condition(condition, body_b, end_b)?;

                self.b.set_insert_point(body_b);
                self.lower_stmt(body)?;
                if !self.b.block_terminated() {
                    self.b.emit_br(header);
                }
                self.b.set_insert_point(end_b);
            }
        }
        Ok(())
    }

    fn lower_args(&mut self, args: &[Expr]) -> BaaResult<Vec<Value>> {
        args.iter().map(|a| self.lower_expr(a)).collect()
    }

    fn lower_expr(&mut self, expr: &Expr) -> BaaResult<Value> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::const_int(*value, Type::I64)),
            Expr::Char { value, .. } => Ok(Value::const_int(*value, Type::I64)),
            Expr::Str { value, .. } => {
                let id = self.b.intern_string(value);
                Ok(Value::ConstStr { id })
            }
            Expr::VarRef { name, line, col } => {
                let ptr = self.lookup_ptr(name, *line, *col)?;
                let reg = self.b.emit_load(Type::I64, ptr);
                Ok(Value::reg(reg, Type::I64))
            }
            Expr::Unary { op: UnaryOp::Neg, operand, .. } => {
                let v = self.lower_expr(operand)?;
                let reg = self.b.emit_unary(Opcode::Neg, Type::I64, v);
                Ok(Value::reg(reg, Type::I64))
            }
            Expr::Unary { op: UnaryOp::Not, operand, .. } => {
                let v = self.lower_expr(operand)?;
                let cond = self.b.emit_cmp(CmpPred::Eq, v, Value::const_int(0, Type::I64));
                self.materialize_bool(Value::reg(cond, Type::I1))
            }
            Expr::Binary { op, .. } if op.is_logical() => self.materialize_condition(expr),
            Expr::Binary { op, left, right, .. } if op.is_comparison() => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                let cond = self.b.emit_cmp(comparison_pred(*op), l, r);
                self.materialize_bool(Value::reg(cond, Type::I1))
            }
            Expr::Binary { op, left, right, .. } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                let reg = self.b.emit_binary(arith_opcode(*op), Type::I64, l, r);
                Ok(Value::reg(reg, Type::I64))
            }
            Expr::Call { name, args, .. } => {
                let args = self.lower_args(args)?;
                let reg = self.b.emit_call(name, Type::I64, args);
                Ok(Value::reg(reg.unwrap_or(0), Type::I64))
            }
        }
    }

    /// Branch on a condition expression, short-circuiting `&&` and `||`.
    fn lower_condition(
        &mut self,
        expr: &Expr,
        then_block: BlockId,
        else_block: BlockId,
    ) -> BaaResult<()> {
        match expr {
            Expr::Binary { op: BinOp::And, left, right, .. } => {
                let mid = self.b.create_block("و_يمين");
                self.lower_condition(left, mid, else_block)?;
                self.b.set_insert_point(mid);
                self.lower_condition(right, then_block, else_block)
            }
            Expr::Binary { op: BinOp::Or, left, right, .. } => {
                let mid = self.b.create_block("أو_يمين");
                self.lower_condition(left, then_block, mid)?;
                self.b.set_insert_point(mid);
                self.lower_condition(right, then_block, else_block)
            }
            Expr::Binary { op, left, right, .. } if op.is_comparison() => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                let cond = self.b.emit_cmp(comparison_pred(*op), l, r);
                self.b.emit_br_cond(Value::reg(cond, Type::I1), then_block, else_block);
                Ok(())
            }
            Expr::Unary { op: UnaryOp::Not, operand, .. } => {
                self.lower_condition(operand, else_block, then_block)
            }
            other => {
                let v = self.lower_expr(other)?;
                let cond = self.b.emit_cmp(CmpPred::Ne, v, Value::const_int(0, Type::I64));
                self.b.emit_br_cond(Value::reg(cond, Type::I1), then_block, else_block);
                Ok(())
            }
        }
    }

    /// Materialize an i1 as an i64 0/1 through a diamond and a slot; the
    /// optimizer folds it into a phi.
    fn materialize_bool(&mut self, cond: Value) -> BaaResult<Value> {
        let slot = self.b.emit_alloca(Type::I64);
        let true_b = self.b.create_block("صحيح");
        let false_b = self.b.create_block("خطأ");
        let join = self.b.create_block("التقاء");

        self.b.emit_br_cond(cond, true_b, false_b);
        self.b.set_insert_point(true_b);
        self.b.emit_store(Value::const_int(1, Type::I64), self.ptr_value(slot));
        self.b.emit_br(join);
        self.b.set_insert_point(false_b);
        self.b.emit_store(Value::const_int(0, Type::I64), self.ptr_value(slot));
        self.b.emit_br(join);
        self.b.set_insert_point(join);
        let reg = self.b.emit_load(Type::I64, self.ptr_value(slot));
        Ok(Value::reg(reg, Type::I64))
    }

    /// A logical expression in value position: branch, then read back 0/1.
    fn materialize_condition(&mut self, expr: &Expr) -> BaaResult<Value> {
        let slot = self.b.emit_alloca(Type::I64);
        let true_b = self.b.create_block("صحيح");
        let false_b = self.b.create_block("خطأ");
        let join = self.b.create_block("التقاء");

        self.lower_condition(expr, true_b, false_b)?;
        self.b.set_insert_point(true_b);
        self.b.emit_store(Value::const_int(1, Type::I64), self.ptr_value(slot));
        self.b.emit_br(join);
        self.b.set_insert_point(false_b);
        self.b.emit_store(Value::const_int(0, Type::I64), self.ptr_value(slot));
        self.b.emit_br(join);
        self.b.set_insert_point(join);
        let reg = self.b.emit_load(Type::I64, self.ptr_value(slot));
        Ok(Value::reg(reg, Type::I64))
    }
}

fn arith_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        // Logical operators are handled by condition lowering.
        _ => Opcode::Add,
    }
}

fn comparison_pred(op: BinOp) -> CmpPred {
    match op {
        BinOp::Eq => CmpPred::Eq,
        BinOp::Ne => CmpPred::Ne,
        BinOp::Lt => CmpPred::Lt,
        BinOp::Le => CmpPred::Le,
        BinOp::Gt => CmpPred::Gt,
        _ => CmpPred::Ge,
    }
}
