//! Decorator classifier (SPEC_FULL §4.1). Grounded on `original_source/pythonbpf/codegen.py`
//! and `decorators.py`.

use crate::ast::{Module, TopLevelDecl};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Map,
    Struct,
    /// A program-tagged function; carries the index into the declaration's decorator list
    /// where the `section(...)` marker was found is not needed here — the section string
    /// itself is read again in `functions.rs` by decorator name.
    Program,
    Global,
    License,
}

pub struct Classified<'a> {
    pub decl: &'a TopLevelDecl,
    pub kind: Classification,
}

/// Classifies every top-level declaration. A declaration with conflicting tags (e.g. both
/// `map` and `struct`) is a fatal error.
pub fn classify(module: &Module) -> Result<Vec<Classified<'_>>> {
    let mut out = Vec::new();
    for decl in &module.decls {
        let is_map = decl.has_decorator("map");
        let is_struct = decl.has_decorator("struct");
        let is_global = decl.has_decorator("bpfglobal");
        let is_program = decl.has_decorator("section");
        let is_bpf = decl.has_decorator("bpf");

        let tag_count = [is_map, is_struct, is_global, is_program]
            .iter()
            .filter(|b| **b)
            .count();

        if decl.name() == "LICENSE" && is_global && is_bpf {
            out.push(Classified {
                decl,
                kind: Classification::License,
            });
            continue;
        }

        if tag_count > 1 {
            return Err(Error::semantic(
                decl.span,
                format!(
                    "declaration `{}` carries conflicting decorator tags",
                    decl.name()
                ),
            ));
        }

        let kind = if is_map {
            Classification::Map
        } else if is_struct {
            Classification::Struct
        } else if is_global {
            Classification::Global
        } else if is_program {
            Classification::Program
        } else if is_bpf {
            // `@bpf` alone (no `section`) marks a plain helper sub-routine; SPEC_FULL §4.8
            // step 2 notes section is simply omitted for these. They are treated as programs
            // with no section attribution.
            Classification::Program
        } else {
            continue;
        };

        out.push(Classified { decl, kind });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DeclKind, Decorator, FunctionDef};
    use crate::error::Span;

    fn decl(name: &str, decorators: Vec<&str>) -> TopLevelDecl {
        TopLevelDecl {
            span: Span::default(),
            decorators: decorators
                .into_iter()
                .map(|d| Decorator {
                    span: Span::default(),
                    name: d.to_string(),
                    args: Vec::new(),
                })
                .collect(),
            kind: DeclKind::Function(FunctionDef {
                name: name.to_string(),
                params: Vec::new(),
                return_annotation: None,
                body: Vec::new(),
            }),
        }
    }

    #[test]
    fn classifies_map_and_program() {
        let module = Module {
            decls: vec![decl("m", vec!["map"]), decl("p", vec!["bpf", "section"])],
        };
        let classified = classify(&module).unwrap();
        assert_eq!(classified[0].kind, Classification::Map);
        assert_eq!(classified[1].kind, Classification::Program);
    }

    #[test]
    fn conflicting_tags_are_fatal() {
        let module = Module {
            decls: vec![decl("bad", vec!["map", "struct"])],
        };
        assert!(classify(&module).is_err());
    }

    #[test]
    fn license_needs_no_section_tag() {
        let module = Module {
            decls: vec![decl("LICENSE", vec!["bpf", "bpfglobal"])],
        };
        let classified = classify(&module).unwrap();
        assert_eq!(classified[0].kind, Classification::License);
    }
}
