// SPDX-License-Identifier: (LGPL-2.1 OR BSD-2-Clause)

use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use structopt::StructOpt;

/// Compile a restricted Python-like BPF source file to an LLVM IR module and, unless asked to
/// stop early, hand it to llc to produce a loadable object file.
#[derive(Debug, StructOpt)]
struct Command {
    /// Path to the source file
    source: PathBuf,
    /// Path for the emitted object file (defaults to the source path with its extension
    /// replaced by .o)
    #[structopt(short, long)]
    output: Option<PathBuf>,
    /// Optimization level passed through to llc
    #[structopt(short = "O", long = "opt-level", default_value = "2")]
    opt_level: u32,
    /// Stop after emitting the textual .ll and skip invoking llc
    #[structopt(long)]
    emit_llvm: bool,
    /// Override the path to llc instead of resolving it from PATH
    #[structopt(long)]
    llc_path: Option<PathBuf>,
    /// Verbose debug output
    #[structopt(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(opts: Command) -> Result<()> {
    let ll_path = opts.source.with_extension("ll");
    let obj_path = opts
        .output
        .clone()
        .unwrap_or_else(|| opts.source.with_extension("o"));

    let compile_opts = pybpfc::CompileOptions {
        opt_level: opts.opt_level,
        llc_path: opts.llc_path.clone(),
    };

    if opts.emit_llvm {
        let source = std::fs::read_to_string(&opts.source)
            .with_context(|| format!("reading {}", opts.source.display()))?;
        let module = pybpfc::compile_module(&source, &opts.source.to_string_lossy())?;
        pybpfc::write_ll(&module, &ll_path)?;
        log::info!("wrote {}", ll_path.display());
        return Ok(());
    }

    pybpfc::compile_file(&opts.source, &ll_path, &obj_path, &compile_opts)?;
    log::info!("wrote {}", obj_path.display());
    Ok(())
}

fn main() {
    let opts = Command::from_args();
    init_logging(opts.verbose);

    if let Err(e) = run(opts) {
        eprintln!("error: {:#}", e);
        exit(1);
    }
}
