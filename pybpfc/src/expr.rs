//! Expression evaluator (SPEC_FULL §4.6). Grounded on
//! `original_source/pythonbpf/expr_pass.py`.

use crate::ast::Expr;
use crate::context::FnCtx;
use crate::error::{Error, Result};
use crate::helpers;
use crate::ir::{Instruction, Value};
use crate::types::IrType;

/// Evaluates an expression to a (value, type) pair, or a compile-time error for unknown forms
/// (SPEC_FULL §4.6).
pub fn eval(ctx: &mut FnCtx, expr: &Expr) -> Result<(Value, IrType)> {
    match expr {
        Expr::Name { id, span } => {
            if id == "XDP_PASS" {
                return Ok((Value::ConstInt(2), IrType::I64));
            }
            if id == "XDP_DROP" {
                return Ok((Value::ConstInt(1), IrType::I64));
            }
            let local = ctx
                .resolve_local(id)
                .ok_or_else(|| Error::semantic(*span, format!("undefined name `{}`", id)))?
                .clone();
            let dst = ctx.func.fresh_reg();
            ctx.func.push(
                ctx.block,
                Instruction::Load {
                    dst: dst.clone(),
                    ty: local.ty.clone(),
                    ptr: local.ptr,
                },
            );
            Ok((dst, local.ty))
        }
        Expr::Int { value, .. } => Ok((Value::ConstInt(*value), IrType::I64)),
        Expr::Bool { value, .. } => Ok((Value::ConstInt(if *value { 1 } else { 0 }), IrType::I1)),
        Expr::Str { .. } => Err(Error::semantic(
            expr.span(),
            "a bare string literal is not a valid value in this context",
        )),
        Expr::FString { .. } => Err(Error::semantic(
            expr.span(),
            "an f-string is only valid as a `print` argument",
        )),
        Expr::BinOp { .. } => crate::binops::eval_binop(ctx, expr),
        Expr::Compare { .. } => crate::binops::eval_compare(ctx, expr),
        Expr::Attribute { base, field, span } => eval_attribute(ctx, base, field, *span),
        Expr::Call { func, args, keywords, span } => eval_call(ctx, func, args, keywords, *span),
    }
}

fn eval_attribute(
    ctx: &mut FnCtx,
    base: &Expr,
    field: &str,
    span: crate::error::Span,
) -> Result<(Value, IrType)> {
    let base_name = match base {
        Expr::Name { id, .. } => id.clone(),
        _ => return Err(Error::semantic(span, "unsupported attribute-access base")),
    };
    let local = ctx
        .resolve_local(&base_name)
        .ok_or_else(|| Error::semantic(span, format!("undefined name `{}`", base_name)))?
        .clone();
    let struct_name = local
        .struct_name
        .clone()
        .ok_or_else(|| Error::semantic(span, format!("`{}` is not a struct instance", base_name)))?;
    let descriptor = ctx
        .struct_table
        .get(&struct_name)
        .ok_or_else(|| Error::semantic(span, format!("unknown struct `{}`", struct_name)))?;
    let index = descriptor
        .field_index(field)
        .ok_or_else(|| Error::semantic(span, format!("struct `{}` has no field `{}`", struct_name, field)))?;
    let field_ty = descriptor.field_type(field).unwrap().clone();

    let field_ptr = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Gep {
            dst: field_ptr.clone(),
            ty: IrType::Struct(struct_name),
            ptr: local.ptr,
            indices: vec![index as i64],
        },
    );
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Load {
            dst: dst.clone(),
            ty: field_ty.clone(),
            ptr: field_ptr,
        },
    );
    Ok((dst, field_ty))
}

fn eval_call(
    ctx: &mut FnCtx,
    func: &Expr,
    args: &[Expr],
    keywords: &[crate::ast::Keyword],
    span: crate::error::Span,
) -> Result<(Value, IrType)> {
    match func {
        Expr::Name { id, .. } if id == "deref" => eval_deref(ctx, args, span),
        Expr::Name { id, .. } if helpers::is_plain_helper(id) => {
            helpers::dispatch_plain(ctx, id, args, span)
        }
        Expr::Name { id, .. } => Err(Error::semantic(span, format!("unknown call target `{}`", id))),
        Expr::Attribute { base, field, .. } => {
            let map_name = map_name_of(base)?;
            if !ctx.is_map(&map_name) {
                return Err(Error::semantic(span, format!("`{}` is not a map", map_name)));
            }
            if !helpers::is_map_method(field) {
                return Err(Error::semantic(span, format!("unknown or unsupported map helper `{}`", field)));
            }
            helpers::dispatch_map_method(ctx, &map_name, field, args, keywords, span)
        }
        _ => Err(Error::semantic(span, "unsupported call form")),
    }
}

/// The source surface writes map access either as a bare map name or as a zero-argument call
/// to the map-declaring function (`last().lookup(0)`); both resolve to the same map table
/// entry.
fn map_name_of(base: &Expr) -> Result<String> {
    match base {
        Expr::Name { id, .. } => Ok(id.clone()),
        Expr::Call { func, .. } => match func.as_ref() {
            Expr::Name { id, .. } => Ok(id.clone()),
            _ => Err(Error::semantic(base.span(), "unsupported map-access expression")),
        },
        _ => Err(Error::semantic(base.span(), "unsupported map-access expression")),
    }
}

fn eval_deref(ctx: &mut FnCtx, args: &[Expr], span: crate::error::Span) -> Result<(Value, IrType)> {
    let inner = args
        .first()
        .ok_or_else(|| Error::semantic(span, "deref requires one argument"))?;
    if let Expr::Call { func, args: inner_args, .. } = inner {
        if matches!(func.as_ref(), Expr::Name { id, .. } if id == "deref") {
            let _ = inner_args;
            return Err(Error::semantic(span, "nested deref is not supported"));
        }
    }
    let (ptr, _ty) = eval(ctx, inner)?;
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Load {
            dst: dst.clone(),
            ty: IrType::I64,
            ptr,
        },
    );
    Ok((dst, IrType::I64))
}
