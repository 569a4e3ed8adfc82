//! Driver / orchestrator (SPEC_FULL §4.12, §4.14). Composes every pass in the fixed order
//! SPEC_FULL §5 specifies (lex/parse → struct → map → function → global → license → module
//! flags), writes the textual `.ll`, and invokes the external static compiler. Grounded on
//! `tools/compile.py`'s subprocess `llc` invocation and `libbpf-cargo`'s own use of `tempfile`
//! for its generation pipeline; the in-memory/loader boundary mirrors `libbpf-rs`'s
//! `ObjectBuilder` builder-pattern shape.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::decorators;
use crate::error::{Error, Result};
use crate::functions;
use crate::globals;
use crate::ir::Module;
use crate::lexer;
use crate::license;
use crate::maps;
use crate::module_meta;
use crate::parser;
use crate::structs;

/// End-to-end compilation options (SPEC_FULL §4.14).
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub opt_level: u32,
    /// Override for locating `llc`; resolved from `PATH` via the `which` crate when absent.
    pub llc_path: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { opt_level: 2, llc_path: None }
    }
}

/// Lowers source text through every pass in the fixed pipeline order and returns the finished
/// IR module (SPEC_FULL §2 "Data flow", §5 "Ordering between passes is fixed").
pub fn compile_module(source: &str, source_filename: &str) -> Result<Module> {
    let tokens = lexer::tokenize(source)?;
    let ast_module = parser::parse(tokens)?;
    let classified = decorators::classify(&ast_module)?;

    // Struct table must be complete before the function pass begins (SPEC_FULL §3 invariant).
    let struct_table = structs::run(&classified)?;

    let mut module = Module::new(source_filename);
    let map_table = maps::run(&classified, &mut module)?;

    // Functions never reference module-scalar globals directly in this subset (SPEC_FULL §4.8
    // names no such construct), so the global table function bodies see is always empty —
    // consistent with globals being emitted only after the function pass runs.
    let no_globals_yet: HashSet<String> = HashSet::new();
    let function_names =
        functions::run(&classified, &mut module, &struct_table, &map_table, &no_globals_yet)?;

    globals::run(&classified, &mut module)?;
    let license_name = license::run(&classified, &mut module)?;

    // SPEC_FULL §4.11: compiler.used lists every emitted map, program function, and the
    // license — not plain scalar globals.
    let mut emitted = Vec::with_capacity(map_table.len() + function_names.len() + 1);
    emitted.extend(map_table.keys().cloned());
    emitted.extend(function_names);
    emitted.extend(license_name);

    module_meta::finalize(&mut module, emitted);
    Ok(module)
}

/// Writes the textual `.ll` for `module` to `path` (SPEC_FULL §4.12). The module's `Display`
/// impl already starts with the `source_filename = "..."` line.
pub fn write_ll(module: &Module, path: &Path) -> Result<()> {
    fs::write(path, module.to_string()).map_err(|source| Error::Io { path: path.to_path_buf(), source })
}

fn resolve_llc(opts: &CompileOptions) -> Result<PathBuf> {
    if let Some(path) = &opts.llc_path {
        return Ok(path.clone());
    }
    which::which("llc").map_err(|e| Error::external(format!("could not locate `llc` on PATH: {}", e)))
}

/// Invokes the external static compiler with the BPF target, object filetype, and the
/// requested optimization level (SPEC_FULL §4.12, §6 "Output artifact").
fn invoke_llc(ll_path: &Path, obj_path: &Path, opts: &CompileOptions) -> Result<()> {
    let llc = resolve_llc(opts)?;
    let status = Command::new(llc)
        .arg("-march=bpf")
        .arg("-filetype=obj")
        .arg(format!("-O{}", opts.opt_level))
        .arg("-o")
        .arg(obj_path)
        .arg(ll_path)
        .status()
        .map_err(|e| Error::external(format!("failed to invoke llc: {}", e)))?;
    if !status.success() {
        return Err(Error::external(format!("llc exited with status {}", status)));
    }
    Ok(())
}

/// Compiles a source file end to end: lex/parse/lower, write `.ll`, then invoke the external
/// static compiler to produce the object file at `obj_path` (SPEC_FULL §4.12).
pub fn compile_file(
    source_path: &Path,
    ll_path: &Path,
    obj_path: &Path,
    opts: &CompileOptions,
) -> Result<()> {
    let source = fs::read_to_string(source_path)
        .map_err(|source_err| Error::Io { path: source_path.to_path_buf(), source: source_err })?;
    let module = compile_module(&source, &source_path.to_string_lossy())?;
    write_ll(&module, ll_path)?;
    invoke_llc(ll_path, obj_path, opts)
}

/// The host loader boundary (SPEC_FULL §1 "out of scope... the host loader", §4.12). No
/// concrete implementation ships here — this crate's job ends at a loadable `.o`; callers
/// supply their own binding to a BPF loader library to attach the object to the kernel.
pub trait BpfObjectLoader {
    type Handle;
    fn load(&self, object_path: &Path) -> Result<Self::Handle>;
}

/// Compiles entirely via temporary files and hands the resulting object path to a caller-
/// supplied loader, so this variant never leaves artifacts behind on disk (SPEC_FULL §4.12
/// "a variant computes in-memory via temporary files").
pub fn compile_in_memory<L: BpfObjectLoader>(
    source: &str,
    source_filename: &str,
    opts: &CompileOptions,
    loader: &L,
) -> Result<L::Handle> {
    let dir =
        tempfile::tempdir().map_err(|e| Error::external(format!("failed to create temp dir: {}", e)))?;
    let ll_path = dir.path().join("module.ll");
    let obj_path = dir.path().join("module.o");

    let module = compile_module(source, source_filename)?;
    write_ll(&module, &ll_path)?;
    invoke_llc(&ll_path, &obj_path, opts)?;
    loader.load(&obj_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_WORLD: &str = "\
@bpf
@bpfglobal
def LICENSE() -> c_int64:
    return \"GPL\"

@bpf
@section(\"tracepoint/syscalls/sys_enter_execve\")
def hello(ctx: c_void_p) -> c_int64:
    print(\"Hello, World!\")
    return c_int64(0)
";

    #[test]
    fn compiles_hello_world_tracepoint() {
        let module = compile_module(HELLO_WORLD, "hello.py").unwrap();
        let text = module.to_string();
        assert!(text.starts_with("source_filename = \"hello.py\""));
        assert!(module.functions.iter().any(|f| f.name == "hello"));
        assert!(module
            .functions
            .iter()
            .find(|f| f.name == "hello")
            .unwrap()
            .section
            .as_deref()
            == Some("tracepoint/syscalls/sys_enter_execve"));
        let license = module.globals.iter().find(|g| g.name == "LICENSE").unwrap();
        assert_eq!(license.section.as_deref(), Some("license"));
        assert!(module.compiler_used.contains(&"hello".to_string()));
        assert!(module.compiler_used.contains(&"LICENSE".to_string()));
    }

    const SYNC_THROTTLE: &str = "\
@bpf
@map
def last() -> HashMap:
    return HashMap(key=c_uint64, value=c_uint64, max_entries=3)

@bpf
@section(\"tracepoint/syscalls/sys_enter_sync\")
def do_trace(ctx: c_void_p) -> c_int64:
    key = 0
    tsp = last().lookup(key)
    if tsp:
        kt = ktime()
        delta = kt - tsp
        if delta < 1000000000:
            time_ms = delta // 1000000
            print(f\"sync repeated within a second, last {time_ms} ms ago\")
        last().delete(key)
    else:
        kt = ktime()
        last().update(key, kt)
    return c_int64(0)

@bpf
@bpfglobal
def LICENSE() -> c_int64:
    return \"GPL\"
";

    #[test]
    fn compiles_sync_throttle_scenario() {
        let module = compile_module(SYNC_THROTTLE, "sync.py").unwrap();
        assert_eq!(
            module
                .globals
                .iter()
                .filter(|g| g.section.as_deref() == Some(".maps"))
                .count(),
            1
        );
        let text = module.to_string();
        // Helper IDs 1 (lookup), 5 (ktime), 6 (print), 2 (update), 3 (delete) all appear.
        for needle in [
            "inttoptr (i64 1 to",
            "inttoptr (i64 5 to",
            "inttoptr (i64 6 to",
            "inttoptr (i64 2 to",
            "inttoptr (i64 3 to",
        ] {
            assert!(text.contains(needle), "missing `{}` in emitted IR", needle);
        }
        // `//` lowers to the unsigned-div IR op.
        assert!(text.contains(" udiv "));
    }

    const XDP_COUNTER: &str = "\
@bpf
@map
def count() -> HashMap:
    return HashMap(key=c_int64, value=c_int64, max_entries=1)

@bpf
@section(\"xdp\")
def count_packets(ctx: c_void_p) -> c_int64:
    key = 0
    one = 1
    prev = count().lookup(key)
    if prev:
        prevval = prev + 1
        count().update(key, prevval)
        return XDP_PASS
    else:
        count().update(key, one)
    return XDP_PASS

@bpf
@bpfglobal
def LICENSE() -> c_int64:
    return \"GPL\"
";

    #[test]
    fn compiles_xdp_pass_counter_scenario() {
        let module = compile_module(XDP_COUNTER, "xdp.py").unwrap();
        let text = module.to_string();
        // `XDP_PASS` always lowers to a return of constant 2, both on the early and the
        // fall-through path.
        assert_eq!(text.matches("ret i64 2").count(), 2);
    }

    #[test]
    fn empty_module_renders_only_fixed_preamble_and_metadata() {
        let module = compile_module("", "empty.py").unwrap();
        assert!(module.globals.is_empty());
        assert!(module.functions.is_empty());
        let text = module.to_string();
        assert!(text.starts_with("source_filename = \"empty.py\""));
        assert!(text.contains(&format!("target datalayout = \"{}\"", crate::ir::DATA_LAYOUT)));
        assert!(text.contains(&format!("target triple = \"{}\"", crate::ir::TARGET_TRIPLE)));
        assert!(text.contains("!llvm.module.flags"));
        assert!(text.contains("!llvm.ident"));
    }
}
