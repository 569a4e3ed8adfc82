//! Module-level metadata assembly (SPEC_FULL §4.11). Grounded on
//! `original_source/pythonbpf/globals_pass.py`'s `emit_llvm_compiler_used` and
//! `codegen.py`'s top-level orchestration of module flags / `llvm.ident`.

use crate::debuginfo::FlagBehavior;
use crate::ir::{Module, ModuleFlag};

pub const COMPILER_IDENT: &str = "pybpfc";

/// Attaches module flags, `llvm.ident`, and `llvm.compiler.used` after every other pass has
/// run (SPEC_FULL §4.11). `emitted_names` lists every map, program function, and the license
/// global actually present, in emission order, to prevent the external static compiler from
/// dead-stripping them.
pub fn finalize(module: &mut Module, emitted_names: Vec<String>) {
    module.module_flags = vec![
        ModuleFlag {
            behavior: FlagBehavior::Error as u32,
            key: "wchar_size",
            value: "4".to_string(),
        },
        ModuleFlag {
            behavior: FlagBehavior::Max as u32,
            key: "frame-pointer",
            value: "2".to_string(),
        },
        ModuleFlag {
            behavior: FlagBehavior::Warning as u32,
            key: "Debug Info Version",
            value: "3".to_string(),
        },
        ModuleFlag {
            behavior: FlagBehavior::Max as u32,
            key: "Dwarf Version",
            value: "5".to_string(),
        },
    ];
    module.ident = Some(format!("{} (pybpfc)", COMPILER_IDENT));
    module.compiler_used = emitted_names;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_four_module_flags() {
        let mut module = Module::new("x.py");
        finalize(&mut module, vec!["LICENSE".to_string()]);
        assert_eq!(module.module_flags.len(), 4);
        assert_eq!(module.compiler_used, vec!["LICENSE".to_string()]);
    }

    /// SPEC_FULL §4.11 labels `frame-pointer` and `Dwarf Version` "override-use-largest", which
    /// is behavior code 7 (`FlagBehavior::Max`), not plain `Override` (4).
    #[test]
    fn frame_pointer_and_dwarf_version_use_override_use_largest_behavior() {
        let mut module = Module::new("x.py");
        finalize(&mut module, vec![]);
        let behavior_of = |key: &str| {
            module
                .module_flags
                .iter()
                .find(|f| f.key == key)
                .unwrap()
                .behavior
        };
        assert_eq!(behavior_of("frame-pointer"), FlagBehavior::Max as u32);
        assert_eq!(behavior_of("Dwarf Version"), FlagBehavior::Max as u32);
        assert_eq!(behavior_of("wchar_size"), FlagBehavior::Error as u32);
        assert_eq!(behavior_of("Debug Info Version"), FlagBehavior::Warning as u32);
    }
}
