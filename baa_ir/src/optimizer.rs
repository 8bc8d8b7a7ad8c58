//! Optimization pipeline driver
//!
//! Runs the pass sequence mem2reg → constfold → copyprop → CSE (O2 only) →
//! DCE and iterates it until no pass reports a change or the iteration cap
//! is hit. O0 runs nothing. An optional verify gate runs both verifiers
//! after every iteration to catch pass bugs early.

use crate::module::Module;
use crate::passes::{ConstFold, CopyProp, Cse, Dce, Mem2Reg, Pass};
use crate::verify;
use baa_common::{BaaError, BaaResult};

/// Fixpoint iteration cap
pub const MAX_ITERATIONS: usize = 10;

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization (debugging)
    O0,
    /// Standard pipeline (default)
    O1,
    /// Standard pipeline plus CSE
    O2,
}

impl OptLevel {
    pub fn from_level(level: u8) -> OptLevel {
        match level {
            0 => OptLevel::O0,
            1 => OptLevel::O1,
            _ => OptLevel::O2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OptLevel::O0 => "O0",
            OptLevel::O1 => "O1",
            OptLevel::O2 => "O2",
        }
    }
}

/// Statistics from one optimizer run
#[derive(Debug, Clone, Default)]
pub struct OptStats {
    pub iterations: usize,
    pub passes_changed: Vec<String>,
}

/// The optimization pipeline
pub struct Optimizer {
    level: OptLevel,
    max_iterations: usize,
    verify_gate: bool,
    stats: OptStats,
}

impl Optimizer {
    pub fn new(level: OptLevel) -> Self {
        Self {
            level,
            max_iterations: MAX_ITERATIONS,
            verify_gate: false,
            stats: OptStats::default(),
        }
    }

    /// Override the fixpoint iteration cap (defaults to 10).
    pub fn with_max_iterations(mut self, cap: usize) -> Self {
        self.max_iterations = cap;
        self
    }

    /// Run both verifiers after every pipeline iteration.
    pub fn with_verify_gate(mut self, enabled: bool) -> Self {
        self.verify_gate = enabled;
        self
    }

    pub fn stats(&self) -> &OptStats {
        &self.stats
    }

    /// Run the pipeline to fixpoint. `Ok(true)` when anything changed.
    pub fn run(&mut self, module: &mut Module) -> BaaResult<bool> {
        if self.level == OptLevel::O0 {
            return Ok(false);
        }

        let mut passes: Vec<Box<dyn Pass>> = vec![
            Box::new(Mem2Reg),
            Box::new(ConstFold),
            Box::new(CopyProp),
        ];
        if self.level == OptLevel::O2 {
            passes.push(Box::new(Cse));
        }
        passes.push(Box::new(Dce));

        log::debug!("تشغيل المحسن بمستوى {}", self.level.name());

        let mut total_changed = false;
        for iteration in 0..self.max_iterations {
            let mut changed = false;
            for pass in &mut passes {
                let pass_changed = match pass.run(module) {
                    Ok(c) => c,
                    Err(e) => return Err(BaaError::pass(pass.name(), e.to_string())),
                };
                log::debug!(
                    "دورة {} تمريرة {}: {}",
                    iteration + 1,
                    pass.name(),
                    if pass_changed { "تغيير" } else { "لا تغيير" }
                );
                if pass_changed {
                    self.stats.passes_changed.push(pass.name().to_owned());
                }
                changed |= pass_changed;
            }
            self.stats.iterations = iteration + 1;

            if self.verify_gate {
                self.run_verify_gate(module, iteration + 1)?;
            }

            if !changed {
                break;
            }
            total_changed = true;
        }

        Ok(total_changed)
    }

    fn run_verify_gate(&self, module: &mut Module, iteration: usize) -> BaaResult<()> {
        if let Err(diags) = verify::verify_module_ir(module) {
            return Err(BaaError::verify(format!(
                "فشل التحقق من سلامة IR بعد الدورة {}:\n{}",
                iteration, diags
            )));
        }
        if let Err(diags) = verify::verify_module_ssa(module) {
            return Err(BaaError::ssa(format!(
                "فشل التحقق من SSA بعد الدورة {}:\n{}",
                iteration, diags
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::instruction::Opcode;
    use crate::types::Type;
    use crate::value::Value;

    /// A function whose value flows through a stack slot, then constant
    /// arithmetic; the full pipeline folds it to `ret 8`.
    fn pipeline_module() -> Module {
        let mut b = IrBuilder::new("خط_كامل");
        b.create_func("الرئيسية", Type::I64);
        let entry = b.create_block("بداية");
        b.set_insert_point(entry);
        let ptr = b.emit_alloca(Type::I64);
        let ptr_val = || Value::reg(ptr, Type::I64.ptr_to());
        b.emit_store(Value::const_int(5, Type::I64), ptr_val());
        let x = b.emit_load(Type::I64, ptr_val());
        let sum = b.emit_binary(
            Opcode::Add,
            Type::I64,
            Value::reg(x, Type::I64),
            Value::const_int(3, Type::I64),
        );
        b.emit_ret(Some(Value::reg(sum, Type::I64)));
        b.finish()
    }

    #[test]
    fn test_pipeline_folds_to_constant_return() {
        let mut m = pipeline_module();
        let mut opt = Optimizer::new(OptLevel::O2).with_verify_gate(true);
        assert!(opt.run(&mut m).unwrap());

        let f = m.function("الرئيسية").unwrap();
        let entry = f.entry().unwrap();
        let insts: Vec<_> = f.block(entry).insts.iter().map(|&i| f.inst(i)).collect();
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].op, Opcode::Ret);
        assert_eq!(insts[0].operands[0].as_const_int(), Some(8));
    }

    #[test]
    fn test_o0_runs_nothing() {
        let mut m = pipeline_module();
        let mut opt = Optimizer::new(OptLevel::O0);
        assert!(!opt.run(&mut m).unwrap());

        let f = m.function("الرئيسية").unwrap();
        let entry = f.entry().unwrap();
        assert_eq!(f.block(entry).insts.len(), 4);
    }

    #[test]
    fn test_fixpoint_terminates_within_cap() {
        let mut m = pipeline_module();
        let mut opt = Optimizer::new(OptLevel::O1);
        opt.run(&mut m).unwrap();
        assert!(opt.stats().iterations <= MAX_ITERATIONS);
        // Converged: the final iteration reported no change.
        assert!(opt.stats().iterations >= 2);
    }

    #[test]
    fn test_custom_iteration_cap() {
        let mut m = pipeline_module();
        let mut opt = Optimizer::new(OptLevel::O1).with_max_iterations(1);
        opt.run(&mut m).unwrap();
        assert_eq!(opt.stats().iterations, 1);
    }

    #[test]
    fn test_level_from_u8() {
        assert_eq!(OptLevel::from_level(0), OptLevel::O0);
        assert_eq!(OptLevel::from_level(1), OptLevel::O1);
        assert_eq!(OptLevel::from_level(2), OptLevel::O2);
        assert_eq!(OptLevel::from_level(9), OptLevel::O2);
    }
}
