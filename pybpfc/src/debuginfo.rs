//! DWARF metadata generator (SPEC_FULL §4.4, §4.11). Grounded on
//! `original_source/pythonbpf/debuginfo/debug_info_generator.py` and `dtypes.py`. Builds raw
//! metadata node bodies and registers them on the module via `ir::Module::push_metadata`.

use crate::ir::Module;

/// Mismatch-behavior codes for module flags (distinct from the flag *values* themselves).
/// Mirrors `original_source/pythonbpf/debuginfo/dtypes.py`'s `DwarfBehaviorEnum`.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum FlagBehavior {
    Error = 1,
    Warning = 2,
    Require = 3,
    Override = 4,
    AppendUnique = 5,
    Max = 7,
}

pub const DW_LANG_C11: u32 = 29;

pub struct DebugInfoGenerator<'m> {
    module: &'m mut Module,
    compile_unit: Option<u32>,
}

impl<'m> DebugInfoGenerator<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        DebugInfoGenerator {
            module,
            compile_unit: None,
        }
    }

    /// Lazily creates (once per module) the `DICompileUnit` every other debug-info node is
    /// anchored under, with `DW_LANG_C11`.
    pub fn compile_unit(&mut self) -> u32 {
        if let Some(id) = self.compile_unit {
            return id;
        }
        let file = self.module.push_metadata(
            false,
            format!("!DIFile(filename: \"{}\", directory: \".\")", self.module.source_filename),
        );
        let id = self.module.push_metadata(
            true,
            format!(
                "!DICompileUnit(language: DW_LANG_C11, file: !{}, producer: \"pybpfc\", isOptimized: false, runtimeVersion: 0, emissionKind: FullDebug)",
                file
            ),
        );
        self.compile_unit = Some(id);
        id
    }

    pub fn uint_type(&mut self) -> u32 {
        self.module.push_metadata(
            false,
            "!DIBasicType(name: \"unsigned int\", size: 32, encoding: DW_ATE_unsigned)".to_string(),
        )
    }

    pub fn int_type(&mut self) -> u32 {
        self.module.push_metadata(
            false,
            "!DIBasicType(name: \"int\", size: 32, encoding: DW_ATE_signed)".to_string(),
        )
    }

    pub fn uint64_type(&mut self) -> u32 {
        self.module.push_metadata(
            false,
            "!DIBasicType(name: \"long unsigned int\", size: 64, encoding: DW_ATE_unsigned)".to_string(),
        )
    }

    /// An array type whose element count encodes a BPF map-type discriminant or an
    /// entry/size count (SPEC_FULL §4.4's "array whose element count encodes..." encoding).
    pub fn array_type(&mut self, elem_ty: u32, count: u64) -> u32 {
        let subrange = self
            .module
            .push_metadata(false, format!("!DISubrange(count: {})", count));
        self.module.push_metadata(
            false,
            format!(
                "!DICompositeType(tag: DW_TAG_array_type, baseType: !{}, size: 32, elements: !{{!{}}})",
                elem_ty, subrange
            ),
        )
    }

    pub fn pointer_type(&mut self, pointee: u32, size_bits: u32) -> u32 {
        self.module.push_metadata(
            false,
            format!(
                "!DIDerivedType(tag: DW_TAG_pointer_type, baseType: !{}, size: {})",
                pointee, size_bits
            ),
        )
    }

    pub fn struct_member(&mut self, name: &str, ty: u32, offset_bits: u64) -> u32 {
        self.module.push_metadata(
            false,
            format!(
                "!DIDerivedType(tag: DW_TAG_member, name: \"{}\", baseType: !{}, size: 64, offsetInBits: {})",
                name, ty, offset_bits
            ),
        )
    }

    pub fn struct_type(&mut self, members: &[u32], size_bits: u64, distinct: bool) -> u32 {
        let list = members
            .iter()
            .map(|m| format!("!{}", m))
            .collect::<Vec<_>>()
            .join(", ");
        self.module.push_metadata(
            distinct,
            format!(
                "!DICompositeType(tag: DW_TAG_structure_type, size: {}, elements: !{{{}}})",
                size_bits, list
            ),
        )
    }

    pub fn global_var(&mut self, name: &str, ty: u32, is_local: bool) -> u32 {
        let cu = self.compile_unit();
        let var = self.module.push_metadata(
            false,
            format!(
                "!DIGlobalVariable(name: \"{}\", scope: !{}, type: !{}, isLocal: {}, isDefinition: true)",
                name, cu, ty, is_local
            ),
        );
        self.module.push_metadata(
            true,
            format!("!DIGlobalVariableExpression(var: !{}, expr: !DIExpression())", var),
        )
    }
}
