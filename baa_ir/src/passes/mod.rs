//! Optimization passes over IR modules
//!
//! Every pass reports whether it changed the module so the pipeline can
//! iterate to fixpoint. Pass names are the Arabic identifiers used in
//! user-facing diagnostics and logs.

use crate::module::Module;
use baa_common::BaaResult;

pub mod canon;
pub mod cfg_simplify;
pub mod constfold;
pub mod copyprop;
pub mod cse;
pub mod dce;
pub mod mem2reg;
pub mod outssa;

pub use canon::Canonicalize;
pub use cfg_simplify::{split_critical_edge, CfgSimplify};
pub use constfold::ConstFold;
pub use copyprop::CopyProp;
pub use cse::Cse;
pub use dce::Dce;
pub use mem2reg::Mem2Reg;
pub use outssa::OutOfSsa;

/// A transformation over a whole module
pub trait Pass {
    /// The user-facing pass name
    fn name(&self) -> &'static str;

    /// Run the pass; `Ok(true)` when the module was modified.
    fn run(&mut self, module: &mut Module) -> BaaResult<bool>;
}

/// Run one pass with debug logging.
pub fn run_pass(pass: &mut dyn Pass, module: &mut Module) -> BaaResult<bool> {
    let changed = pass.run(module)?;
    log::debug!(
        "تمريرة {}: {}",
        pass.name(),
        if changed { "تغيير" } else { "لا تغيير" }
    );
    Ok(changed)
}
