//! Function pass (SPEC_FULL §4.8): per-BPF-program two-phase lowering (pre-allocation, then
//! statement lowering). Grounded on `original_source/pythonbpf/functions_pass.py`.

use std::collections::{HashMap, HashSet};

use crate::ast::{AssignTarget, DeclKind, Expr, Stmt};
use crate::context::{FnCtx, LocalSymbol};
use crate::decorators::{Classification, Classified};
use crate::error::{Error, Result, Span};
use crate::expr;
use crate::helpers;
use crate::ir::{Function, Instruction, IntPred, Module, Value};
use crate::maps::MapTable;
use crate::structs::StructTable;
use crate::types::{deduce_type, IrType};

/// Lowers every program-tagged function. Returns the emitted function names, in emission
/// order, for `module_meta::finalize`'s `llvm.compiler.used` list.
pub fn run(
    classified: &[Classified<'_>],
    module: &mut Module,
    struct_table: &StructTable,
    map_table: &MapTable,
    global_names: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for c in classified {
        if c.kind != Classification::Program {
            continue;
        }
        let func_def = match &c.decl.kind {
            DeclKind::Function(f) => f,
            _ => continue,
        };

        let section = c
            .decl
            .decorator_named("section")
            .and_then(|d| d.args.first())
            .and_then(|e| match e {
                Expr::Str { value, .. } => Some(value.clone()),
                _ => None,
            });

        let ret_ty = infer_return_type(func_def, c.decl.span)?;
        let param_name = func_def
            .params
            .first()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "ctx".to_string());

        let mut ir_func = Function::new(
            func_def.name.clone(),
            ret_ty.clone(),
            vec![(param_name, IrType::OpaquePtr)],
            section,
        );

        {
            let entry = ir_func.entry_block();
            let mut fn_ctx = FnCtx {
                module: &mut *module,
                func: &mut ir_func,
                block: entry,
                locals: HashMap::new(),
                struct_table,
                map_table,
                global_names,
            };
            preallocate(&mut fn_ctx, &func_def.body)?;
            lower_stmts(&mut fn_ctx, &func_def.body)?;
            if !fn_ctx.func.block_terminated(fn_ctx.block) {
                let ret_ty = fn_ctx.func.ret_ty.clone();
                fn_ctx.func.push(
                    fn_ctx.block,
                    Instruction::Ret { ty: ret_ty, val: Some(Value::ConstInt(0)) },
                );
            }
        }

        log::info!("registered program {} section {:?}", func_def.name, ir_func.section);
        module.functions.push(ir_func);
        names.push(func_def.name.clone());
    }
    Ok(names)
}

/// A call-style return/assignment expression's "declared type", if it names one: either an
/// integer-constructor call (`c_int64(...)`) or the `XDP_PASS`/`XDP_DROP` sentinel names
/// (SPEC_FULL §4.8.4).
fn declared_type_of(expr: &Expr) -> Option<IrType> {
    match expr {
        Expr::Call { func, .. } => match func.as_ref() {
            Expr::Name { id, .. } => deduce_type(id, Span::default()).ok(),
            _ => None,
        },
        Expr::Name { id, .. } if id == "XDP_PASS" || id == "XDP_DROP" => Some(IrType::I64),
        _ => None,
    }
}

fn collect_stmts<'a>(stmts: &'a [Stmt], out: &mut Vec<&'a Stmt>) {
    for stmt in stmts {
        out.push(stmt);
        if let Stmt::If { body, orelse, .. } = stmt {
            collect_stmts(body, out);
            collect_stmts(orelse, out);
        }
    }
}

/// Infers a function's return type from its annotation, or by unifying every return
/// expression's declared type; two differing declared types are a fatal error (SPEC_FULL
/// §4.8 step 1, testable scenario S6). Returns without a determinable declared type (a bare
/// `return`, or one returning a local) don't participate in unification and default the whole
/// function to 64-bit if nothing else constrains it (SPEC_FULL §9 "ambiguous fallback").
fn infer_return_type(func: &crate::ast::FunctionDef, span: Span) -> Result<IrType> {
    if let Some(annotation) = &func.return_annotation {
        return deduce_type(annotation, span);
    }
    let mut flat = Vec::new();
    collect_stmts(&func.body, &mut flat);
    let mut inferred: Option<IrType> = None;
    for stmt in flat {
        if let Stmt::Return { value: Some(v), span } = stmt {
            if let Some(ty) = declared_type_of(v) {
                match &inferred {
                    None => inferred = Some(ty),
                    Some(existing) if *existing != ty => {
                        return Err(Error::ty(
                            *span,
                            "function has conflicting return types across its return statements",
                        ))
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(inferred.unwrap_or(IrType::I64))
}

fn is_struct_ctor(value: &Expr, struct_table: &StructTable) -> bool {
    matches!(
        value,
        Expr::Call { func, .. }
            if matches!(func.as_ref(), Expr::Name { id, .. } if struct_table.contains_key(id))
    )
}

/// Classifies an assignment's right-hand side into the stack-allocation type the
/// pre-allocation pass must reserve (SPEC_FULL §4.8 step 4). Constructs with no recognized
/// shape default to 64-bit integer, the documented ambiguous-construct fallback (SPEC_FULL
/// §9).
fn classify_assignment_type(
    value: &Expr,
    struct_table: &StructTable,
    span: Span,
) -> Result<(IrType, Option<String>)> {
    match value {
        Expr::Call { func, .. } => match func.as_ref() {
            Expr::Name { id, .. } => {
                if struct_table.contains_key(id) {
                    return Ok((IrType::Struct(id.clone()), Some(id.clone())));
                }
                if let Ok(ty) = deduce_type(id, span) {
                    return Ok((ty, None));
                }
                // `deref(...)` and plain helper calls (ktime/pid/print) all land on a 64-bit
                // integer local; an unrecognized call name still needs *some* allocation, so
                // it falls back to the same default rather than erroring here — the error
                // surfaces properly once the lowering pass actually evaluates the call.
                Ok((IrType::I64, None))
            }
            Expr::Attribute { field, .. } => {
                if field == "lookup" {
                    Ok((IrType::I64.ptr_to(), None))
                } else {
                    Ok((IrType::I64, None))
                }
            }
            _ => Ok((IrType::I64, None)),
        },
        Expr::Bool { .. } => Ok((IrType::I1, None)),
        Expr::Int { .. } => Ok((IrType::I64, None)),
        Expr::Str { .. } => Ok((IrType::byte_ptr(), None)),
        Expr::BinOp { .. } => Ok((IrType::I64, None)),
        _ => Ok((IrType::I64, None)),
    }
}

/// Walks the entire function body, including nested if/else arms, and stack-allocates every
/// local any assignment writes, all in the entry block (SPEC_FULL §4.8 step 4, testable
/// property 5).
fn preallocate(ctx: &mut FnCtx, body: &[Stmt]) -> Result<()> {
    let mut flat = Vec::new();
    collect_stmts(body, &mut flat);
    let entry = ctx.func.entry_block();
    for stmt in flat {
        if let Stmt::Assign { target: AssignTarget::Name(name), value, span } = stmt {
            if ctx.locals.contains_key(name) {
                continue;
            }
            let (ty, struct_name) = classify_assignment_type(value, ctx.struct_table, *span)?;
            let align = ty.align();
            let ptr = ctx.func.fresh_reg();
            ctx.func.push(entry, Instruction::Alloca { dst: ptr.clone(), ty: ty.clone(), align });
            ctx.locals.insert(name.clone(), LocalSymbol { ptr, ty, struct_name });
        }
    }
    Ok(())
}

fn lower_stmts(ctx: &mut FnCtx, stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
        match stmt {
            Stmt::Assign { target, value, span } => lower_assign(ctx, target, value, *span)?,
            Stmt::Expr { value, .. } => {
                expr::eval(ctx, value)?;
            }
            Stmt::If { cond, body, orelse, .. } => lower_if(ctx, cond, body, orelse)?,
            Stmt::Return { value, span } => lower_return(ctx, value, *span)?,
            Stmt::Pass { .. } => {}
        }
    }
    Ok(())
}

/// Evaluates an assignment's right-hand side. An integer-constructor call (`c_int64(x)`)
/// evaluates its wrapped argument and discards the constructor name, matching how bare return
/// values are unwrapped in §4.8.4; every other form defers to the ordinary expression
/// evaluator.
fn eval_assignment_rhs(ctx: &mut FnCtx, value: &Expr, span: Span) -> Result<Value> {
    if let Expr::Call { func, args, .. } = value {
        if let Expr::Name { id, .. } = func.as_ref() {
            if deduce_type(id, span).is_ok() {
                let inner = args
                    .first()
                    .ok_or_else(|| Error::semantic(span, "constructor call requires one argument"))?;
                let (val, _) = expr::eval(ctx, inner)?;
                return Ok(val);
            }
        }
    }
    let (val, _ty) = expr::eval(ctx, value)?;
    Ok(val)
}

fn lower_assign(ctx: &mut FnCtx, target: &AssignTarget, value: &Expr, span: Span) -> Result<()> {
    match target {
        AssignTarget::Name(name) => {
            if is_struct_ctor(value, ctx.struct_table) {
                // The local's stack slot was already reserved in the pre-allocation pass;
                // constructing a struct instance has no value to store.
                return Ok(());
            }
            let local = ctx.locals.get(name).cloned().ok_or_else(|| {
                Error::semantic(span, format!("assignment to unallocated local `{}`", name))
            })?;
            let val = eval_assignment_rhs(ctx, value, span)?;
            ctx.func.push(
                ctx.block,
                Instruction::Store { ty: local.ty.clone(), val, ptr: local.ptr.clone() },
            );
            Ok(())
        }
        AssignTarget::Attribute { base, field } => {
            if matches!(value, Expr::Str { .. }) {
                // SPEC_FULL §4.8.1 / §9: string-to-char-array struct field assignment is a
                // recognized but deliberately unimplemented construct.
                return Err(Error::semantic(
                    span,
                    "string assignment to a struct byte-array field is not implemented",
                ));
            }
            let local = ctx
                .locals
                .get(base)
                .cloned()
                .ok_or_else(|| Error::semantic(span, format!("undefined name `{}`", base)))?;
            let struct_name = local.struct_name.clone().ok_or_else(|| {
                Error::semantic(span, format!("`{}` is not a struct instance", base))
            })?;
            let descriptor = ctx.struct_table.get(&struct_name).ok_or_else(|| {
                Error::semantic(span, format!("unknown struct `{}`", struct_name))
            })?;
            let index = descriptor.field_index(field).ok_or_else(|| {
                Error::semantic(
                    span,
                    format!("struct `{}` has no field `{}`", struct_name, field),
                )
            })?;
            let field_ty = descriptor.field_type(field).unwrap().clone();
            let field_ptr = ctx.func.fresh_reg();
            ctx.func.push(
                ctx.block,
                Instruction::Gep {
                    dst: field_ptr.clone(),
                    ty: IrType::Struct(struct_name),
                    ptr: local.ptr.clone(),
                    indices: vec![index as i64],
                },
            );
            let val = eval_assignment_rhs(ctx, value, span)?;
            ctx.func.push(ctx.block, Instruction::Store { ty: field_ty, val, ptr: field_ptr });
            Ok(())
        }
    }
}

/// Lowers a condition value to i1: passed through unchanged if it already is one (the normal
/// case for a `Compare` expression), otherwise an explicit pointer- or integer-to-zero compare
/// (SPEC_FULL §4.8.2, §9 "map-lookup null-check" resolution).
fn to_i1(ctx: &mut FnCtx, val: Value, ty: &IrType) -> Value {
    match ty {
        IrType::Int(1) => val,
        IrType::OpaquePtr | IrType::Ptr(_) => {
            let dst = ctx.func.fresh_reg();
            ctx.func.push(
                ctx.block,
                Instruction::ICmp {
                    dst: dst.clone(),
                    pred: IntPred::Ne,
                    ty: IrType::OpaquePtr,
                    lhs: val,
                    rhs: Value::Null,
                },
            );
            dst
        }
        _ => {
            let dst = ctx.func.fresh_reg();
            ctx.func.push(
                ctx.block,
                Instruction::ICmp {
                    dst: dst.clone(),
                    pred: IntPred::Ne,
                    ty: ty.clone(),
                    lhs: val,
                    rhs: Value::ConstInt(0),
                },
            );
            dst
        }
    }
}

fn lower_if(ctx: &mut FnCtx, cond: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<()> {
    let (cond_val, cond_ty) = expr::eval(ctx, cond)?;
    let cond_bit = to_i1(ctx, cond_val, &cond_ty);

    let then_idx = ctx.func.new_block("if.then");
    let else_idx = if orelse.is_empty() { None } else { Some(ctx.func.new_block("if.else")) };
    let end_idx = ctx.func.new_block("if.end");

    let then_label = ctx.func.blocks[then_idx].label.clone();
    let end_label = ctx.func.blocks[end_idx].label.clone();
    let else_label = match else_idx {
        Some(idx) => ctx.func.blocks[idx].label.clone(),
        None => end_label.clone(),
    };
    ctx.func.push(
        ctx.block,
        Instruction::CondBr { cond: cond_bit, then_label, else_label },
    );

    ctx.block = then_idx;
    lower_stmts(ctx, body)?;
    if !ctx.func.block_terminated(ctx.block) {
        ctx.func.push(ctx.block, Instruction::Br { label: end_label.clone() });
    }

    if let Some(idx) = else_idx {
        ctx.block = idx;
        lower_stmts(ctx, orelse)?;
        if !ctx.func.block_terminated(ctx.block) {
            ctx.func.push(ctx.block, Instruction::Br { label: end_label });
        }
    }

    ctx.block = end_idx;
    Ok(())
}

fn lower_return(ctx: &mut FnCtx, value: &Option<Expr>, span: Span) -> Result<()> {
    let ret_ty = ctx.func.ret_ty.clone();
    let Some(expr_val) = value else {
        ctx.func.push(ctx.block, Instruction::Ret { ty: ret_ty, val: Some(Value::ConstInt(0)) });
        return Ok(());
    };

    if let Expr::Call { func, args, .. } = expr_val {
        if let Expr::Name { id, .. } = func.as_ref() {
            if let Ok(declared_ty) = deduce_type(id, span) {
                let inner = args.first().ok_or_else(|| {
                    Error::semantic(span, "return constructor call requires one argument")
                })?;
                let (val, _) = expr::eval(ctx, inner)?;
                if declared_ty != ret_ty {
                    return Err(Error::ty(
                        span,
                        format!(
                            "return type mismatch: function returns {}, expression is {}",
                            ret_ty.llvm_name(),
                            declared_ty.llvm_name()
                        ),
                    ));
                }
                ctx.func.push(ctx.block, Instruction::Ret { ty: declared_ty, val: Some(val) });
                return Ok(());
            }
        }
    }

    let (val, ty) = expr::eval(ctx, expr_val)?;
    if ty != ret_ty {
        return Err(Error::ty(
            span,
            format!(
                "return type mismatch: function returns {}, expression is {}",
                ret_ty.llvm_name(),
                ty.llvm_name()
            ),
        ));
    }
    ctx.func.push(ctx.block, Instruction::Ret { ty: ret_ty, val: Some(val) });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionDef;

    fn func_with_return_annotation(ann: &str) -> crate::ast::FunctionDef {
        FunctionDef {
            name: "f".to_string(),
            params: vec![],
            return_annotation: Some(ann.to_string()),
            body: vec![],
        }
    }

    #[test]
    fn infers_declared_return_type() {
        let f = func_with_return_annotation("c_int64");
        assert_eq!(infer_return_type(&f, Span::default()).unwrap(), IrType::I64);
    }

    #[test]
    fn conflicting_returns_are_fatal() {
        let f = FunctionDef {
            name: "f".to_string(),
            params: vec![],
            return_annotation: None,
            body: vec![
                Stmt::Return {
                    span: Span::default(),
                    value: Some(Expr::Call {
                        span: Span::default(),
                        func: Box::new(Expr::Name { span: Span::default(), id: "c_int64".to_string() }),
                        args: vec![Expr::Int { span: Span::default(), value: 0 }],
                        keywords: vec![],
                    }),
                },
                Stmt::Return {
                    span: Span::default(),
                    value: Some(Expr::Call {
                        span: Span::default(),
                        func: Box::new(Expr::Name { span: Span::default(), id: "c_int32".to_string() }),
                        args: vec![Expr::Int { span: Span::default(), value: 1 }],
                        keywords: vec![],
                    }),
                },
            ],
        };
        assert!(infer_return_type(&f, Span::default()).is_err());
    }

    #[test]
    fn xdp_sentinels_infer_i64() {
        let f = FunctionDef {
            name: "f".to_string(),
            params: vec![],
            return_annotation: None,
            body: vec![Stmt::Return {
                span: Span::default(),
                value: Some(Expr::Name { span: Span::default(), id: "XDP_PASS".to_string() }),
            }],
        };
        assert_eq!(infer_return_type(&f, Span::default()).unwrap(), IrType::I64);
    }
}
