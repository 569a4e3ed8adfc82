//! License pass (SPEC_FULL §4.10). Grounded on
//! `original_source/pythonbpf/license_pass.py`.

use crate::ast::{DeclKind, Expr, Stmt};
use crate::decorators::{Classification, Classified};
use crate::error::{Error, Result};
use crate::ir::{Global, Initializer, Linkage, Module};
use crate::types::IrType;

/// Emits the `LICENSE` global if a properly tagged `LICENSE` function is present (SPEC_FULL
/// §8 testable property 1). Returns its name so the driver can add it to
/// `llvm.compiler.used` and so callers can tell whether one was emitted at all.
pub fn run(classified: &[Classified<'_>], module: &mut Module) -> Result<Option<String>> {
    let license_decl = classified
        .iter()
        .find(|c| c.kind == Classification::License);
    let Some(c) = license_decl else {
        return Ok(None);
    };
    let func = match &c.decl.kind {
        DeclKind::Function(f) => f,
        _ => return Err(Error::semantic(c.decl.span, "LICENSE must be a function")),
    };

    let returns: Vec<&Stmt> = func
        .body
        .iter()
        .filter(|s| matches!(s, Stmt::Return { .. }))
        .collect();
    if returns.len() != 1 {
        return Err(Error::semantic(
            c.decl.span,
            "LICENSE must contain exactly one return statement",
        ));
    }
    let text = match returns[0] {
        Stmt::Return { value: Some(Expr::Str { value, .. }), .. } => value.clone(),
        _ => {
            return Err(Error::semantic(
                c.decl.span,
                "LICENSE must return a string literal",
            ))
        }
    };

    let mut bytes = text.into_bytes();
    bytes.push(0);
    let len = bytes.len() as u32;

    log::info!("registered license \"{}\"", String::from_utf8_lossy(&bytes[..bytes.len() - 1]));
    module.globals.push(Global {
        name: "LICENSE".to_string(),
        ty: IrType::Array(Box::new(IrType::I8), len),
        linkage: Linkage::DsoLocal,
        section: Some("license".to_string()),
        align: 1,
        initializer: Initializer::CStr(bytes),
        is_constant: false,
        dbg_metadata: None,
    });

    Ok(Some("LICENSE".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDef, Module as AstModule, TopLevelDecl};
    use crate::decorators::classify;
    use crate::error::Span;

    fn license_decl(text: &str) -> TopLevelDecl {
        TopLevelDecl {
            span: Span::default(),
            decorators: vec![
                crate::ast::Decorator { span: Span::default(), name: "bpf".to_string(), args: vec![] },
                crate::ast::Decorator { span: Span::default(), name: "bpfglobal".to_string(), args: vec![] },
            ],
            kind: DeclKind::Function(FunctionDef {
                name: "LICENSE".to_string(),
                params: vec![],
                return_annotation: None,
                body: vec![Stmt::Return {
                    span: Span::default(),
                    value: Some(Expr::Str { span: Span::default(), value: text.to_string() }),
                }],
            }),
        }
    }

    #[test]
    fn emits_gpl_license_global() {
        let ast_module = AstModule { decls: vec![license_decl("GPL")] };
        let classified = classify(&ast_module).unwrap();
        let mut module = Module::new("test.py");
        let name = run(&classified, &mut module).unwrap();
        assert_eq!(name, Some("LICENSE".to_string()));
        let global = &module.globals[0];
        assert_eq!(global.section.as_deref(), Some("license"));
        assert_eq!(global.align, 1);
    }

    #[test]
    fn absent_when_no_license_decl() {
        let ast_module = AstModule { decls: vec![] };
        let classified = classify(&ast_module).unwrap();
        let mut module = Module::new("test.py");
        assert_eq!(run(&classified, &mut module).unwrap(), None);
    }
}
