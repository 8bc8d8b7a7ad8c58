//! Baa compiler command-line driver
//!
//! Consumes textual IR, runs the optimization pipeline with optional
//! verification, and emits x86-64 assembly. Nothing is written on failure;
//! diagnostics go to stderr and the exit code is non-zero.

use anyhow::{bail, Context, Result};
use baa_ir::passes::OutOfSsa;
use baa_ir::{text, verify, OptLevel, Optimizer};
use clap::Parser;
use std::path::PathBuf;

/// The Baa compiler
#[derive(Parser)]
#[command(name = "baa")]
#[command(about = "مترجم لغة باء — يحسن IR النصي ويولد تجميع x86-64")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Input text IR file
    input: PathBuf,

    /// Optimization level (0, 1 or 2)
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 1)]
    opt_level: u8,

    /// Verify IR well-formedness before and after optimization
    #[arg(long)]
    verify_ir: bool,

    /// Verify the SSA property after optimization
    #[arg(long)]
    verify_ssa: bool,

    /// Write the optimized text IR to this path
    #[arg(long, value_name = "PATH")]
    emit_ir: Option<PathBuf>,

    /// Output assembly path
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Fixpoint iteration cap for the optimizer
    #[arg(long, default_value_t = baa_ir::MAX_ITERATIONS)]
    max_iterations: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    if let Err(err) = run(&cli) {
        eprintln!("خطأ: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.opt_level > 2 {
        bail!("مستوى تحسين غير معروف: O{}", cli.opt_level);
    }

    let mut module = text::read_module_file(&cli.input)
        .with_context(|| format!("تعذر قراءة {}", cli.input.display()))?;

    if cli.verify_ir {
        if let Err(diags) = verify::verify_module_ir(&mut module) {
            diags.report();
            bail!("فشل التحقق من سلامة IR قبل التحسين");
        }
    }

    let level = OptLevel::from_level(cli.opt_level);
    let mut optimizer = Optimizer::new(level)
        .with_max_iterations(cli.max_iterations)
        .with_verify_gate(cli.verify_ir && cli.verify_ssa);
    optimizer
        .run(&mut module)
        .context("فشل خط أنابيب التحسين")?;
    log::info!(
        "اكتمل التحسين ({}) بعد {} دورة",
        level.name(),
        optimizer.stats().iterations
    );

    if cli.verify_ir {
        if let Err(diags) = verify::verify_module_ir(&mut module) {
            diags.report();
            bail!("فشل التحقق من سلامة IR بعد التحسين");
        }
    }
    if cli.verify_ssa {
        if let Err(diags) = verify::verify_module_ssa(&mut module) {
            diags.report();
            bail!("فشل التحقق من SSA بعد التحسين");
        }
    }

    if let Some(path) = &cli.emit_ir {
        text::write_module_file(&module, path)
            .with_context(|| format!("تعذر كتابة {}", path.display()))?;
    }

    if let Some(path) = &cli.output {
        // The back-end needs conventional code: remove phis first.
        baa_ir::passes::run_pass(&mut OutOfSsa, &mut module)
            .context("فشلت تمريرة الخروج من SSA")?;

        // Build the whole file before touching the disk so a failing
        // function never leaves a partial .s behind.
        let asm = baa_codegen::compile_module(&module).context("فشل توليد الكود")?;
        std::fs::write(path, asm)
            .with_context(|| format!("تعذر كتابة {}", path.display()))?;
    }

    Ok(())
}
