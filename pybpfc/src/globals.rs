//! Global pass (SPEC_FULL §4.9). Grounded on `original_source/pythonbpf/globals_pass.py`.

use crate::ast::{DeclKind, Expr, Stmt};
use crate::decorators::{Classification, Classified};
use crate::error::{Error, Result};
use crate::ir::{Global, Initializer, Linkage, Module};
use crate::types::{deduce_type, IrType};

/// Emits every global-tagged function (excluding `LICENSE`, which `license.rs` owns) as a
/// scalar global variable. Returns the set of emitted names for the duplicate-check invariant
/// in SPEC_FULL §3 and for `module_meta::compiler_used`.
pub fn run(classified: &[Classified<'_>], module: &mut Module) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for c in classified {
        if c.kind != Classification::Global {
            continue;
        }
        let func = match &c.decl.kind {
            DeclKind::Function(f) => f,
            _ => continue,
        };
        if func.name == "LICENSE" {
            // Classified separately as `Classification::License`; never reached here, but
            // guards against a future classifier change silently double-emitting it.
            continue;
        }
        if names.contains(&func.name) || module.globals.iter().any(|g| g.name == func.name) {
            return Err(Error::semantic(
                c.decl.span,
                format!("duplicate global `{}`", func.name),
            ));
        }

        let returns: Vec<&Stmt> = func
            .body
            .iter()
            .filter(|s| matches!(s, Stmt::Return { .. }))
            .collect();
        if returns.len() != 1 {
            return Err(Error::semantic(
                c.decl.span,
                format!("global `{}` must have exactly one return statement", func.name),
            ));
        }
        let value = match returns[0] {
            Stmt::Return { value: Some(v), .. } => v,
            _ => {
                return Err(Error::semantic(
                    c.decl.span,
                    format!("global `{}` must return an initializer", func.name),
                ))
            }
        };

        let ty = match &func.return_annotation {
            Some(name) => deduce_type(name, c.decl.span)?,
            None => IrType::I64,
        };

        let initial = initializer_value(value, c.decl.span)?;

        log::info!("registered global {}", func.name);
        module.globals.push(Global {
            name: func.name.clone(),
            ty,
            linkage: Linkage::DsoLocal,
            section: None,
            align: 8,
            initializer: Initializer::Int(initial),
            is_constant: false,
            dbg_metadata: None,
        });
        names.push(func.name.clone());
    }
    Ok(names)
}

/// The return expression supplying a global's initializer: a literal integer, or a
/// single-argument integer-constructor call. A bare name (referring to another global) is
/// rejected per SPEC_FULL §9's resolved open question.
fn initializer_value(value: &Expr, span: crate::error::Span) -> Result<i64> {
    match value {
        Expr::Int { value, .. } => Ok(*value),
        Expr::Call { args, .. } => match args.first() {
            Some(Expr::Int { value, .. }) => Ok(*value),
            _ => Err(Error::semantic(span, "global initializer call must wrap an integer literal")),
        },
        Expr::Name { id, .. } => Err(Error::semantic(
            span,
            format!("global initializer cannot reference another global (`{}`)", id),
        )),
        _ => Err(Error::semantic(span, "unsupported global initializer expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Span;

    #[test]
    fn rejects_name_initializer() {
        let err = initializer_value(&Expr::Name { span: Span::default(), id: "OTHER".to_string() }, Span::default());
        assert!(err.is_err());
    }

    #[test]
    fn accepts_wrapped_literal() {
        let call = Expr::Call {
            span: Span::default(),
            func: Box::new(Expr::Name { span: Span::default(), id: "c_int64".to_string() }),
            args: vec![Expr::Int { span: Span::default(), value: 42 }],
            keywords: vec![],
        };
        assert_eq!(initializer_value(&call, Span::default()).unwrap(), 42);
    }
}
