//! Helper registry and helper lowering (SPEC_FULL §4.5). Grounded on
//! `original_source/pythonbpf/helper/bpf_helper_handler.py`, `helper_utils.py`, and
//! `helpers.py`.

use crate::ast::{Expr, FStringPart, Keyword};
use crate::context::FnCtx;
use crate::error::{Error, Result, Span};
use crate::expr;
use crate::ir::{CallTarget, Initializer, Instruction, IntBinOp, Linkage, Value};
use crate::types::IrType;

/// Helper IDs (SPEC_FULL §4.5, testable property 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperId {
    Lookup = 1,
    Update = 2,
    Delete = 3,
    Ktime = 5,
    Print = 6,
    Pid = 14,
    PerfOutput = 25,
}

/// Names recognized as plain (non-map-method) helper calls: `ktime()`, `pid()`, `print(...)`.
pub fn is_plain_helper(name: &str) -> bool {
    matches!(name, "ktime" | "pid" | "print")
}

/// Names recognized as map-instance-method helper calls: `<map>.lookup(...)`, etc.
pub fn is_map_method(name: &str) -> bool {
    matches!(name, "lookup" | "update" | "delete" | "output")
}

pub fn dispatch_plain(
    ctx: &mut FnCtx,
    name: &str,
    args: &[Expr],
    span: Span,
) -> Result<(Value, IrType)> {
    match name {
        "ktime" => lower_ktime(ctx),
        "pid" => lower_pid(ctx),
        "print" => lower_print(ctx, args, span),
        other => Err(Error::semantic(span, format!("unknown helper `{}`", other))),
    }
}

pub fn dispatch_map_method(
    ctx: &mut FnCtx,
    map_name: &str,
    method: &str,
    args: &[Expr],
    keywords: &[Keyword],
    span: Span,
) -> Result<(Value, IrType)> {
    match method {
        "lookup" => lower_lookup(ctx, map_name, args, span),
        "update" => lower_update(ctx, map_name, args, keywords, span),
        "delete" => lower_delete(ctx, map_name, args, span),
        "output" => lower_perf_output(ctx, map_name, args, span),
        other => Err(Error::semantic(
            span,
            format!("unknown or unsupported map helper `{}`", other),
        )),
    }
}

fn map_ptr_value(ctx: &mut FnCtx, map_name: &str) -> Value {
    let dst = ctx.func.fresh_reg();
    let from_ty = IrType::Array(Box::new(IrType::OpaquePtr), 1).ptr_to();
    ctx.func.push(
        ctx.block,
        Instruction::BitCast {
            dst: dst.clone(),
            from: from_ty,
            to: IrType::OpaquePtr,
            val: Value::Global(map_name.to_string()),
        },
    );
    dst
}

/// Resolves an argument expression to a pointer value suitable as a helper's key/value operand:
/// a local's existing pointer if the argument names a local, or a freshly-allocated and
/// initialized stack slot if it is an integer constant (SPEC_FULL §4.5).
fn resolve_key_or_value_ptr(ctx: &mut FnCtx, arg: &Expr, span: Span) -> Result<Value> {
    match arg {
        Expr::Name { id, .. } => {
            if let Some(local) = ctx.resolve_local(id) {
                Ok(local.ptr.clone())
            } else {
                Err(Error::semantic(span, format!("undefined name `{}`", id)))
            }
        }
        Expr::Int { value, .. } => {
            let slot = ctx.func.fresh_reg();
            ctx.func.push(
                ctx.block,
                Instruction::Alloca {
                    dst: slot.clone(),
                    ty: IrType::I64,
                    align: 8,
                },
            );
            ctx.func.push(
                ctx.block,
                Instruction::Store {
                    ty: IrType::I64,
                    val: Value::ConstInt(*value),
                    ptr: slot.clone(),
                },
            );
            Ok(slot)
        }
        other => {
            let (val, ty) = expr::eval(ctx, other)?;
            let slot = ctx.func.fresh_reg();
            ctx.func.push(
                ctx.block,
                Instruction::Alloca {
                    dst: slot.clone(),
                    ty: ty.clone(),
                    align: ty.align(),
                },
            );
            ctx.func.push(
                ctx.block,
                Instruction::Store {
                    ty,
                    val,
                    ptr: slot.clone(),
                },
            );
            Ok(slot)
        }
    }
}

fn lower_ktime(ctx: &mut FnCtx) -> Result<(Value, IrType)> {
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(dst.clone()),
            ret_ty: IrType::I64,
            arg_tys: vec![],
            target: CallTarget::HelperId(HelperId::Ktime as i64),
            args: vec![],
        },
    );
    Ok((dst, IrType::I64))
}

fn lower_pid(ctx: &mut FnCtx) -> Result<(Value, IrType)> {
    let raw = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(raw.clone()),
            ret_ty: IrType::I64,
            arg_tys: vec![],
            target: CallTarget::HelperId(HelperId::Pid as i64),
            args: vec![],
        },
    );
    let masked = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::BinOp {
            dst: masked.clone(),
            op: IntBinOp::And,
            ty: IrType::I64,
            lhs: raw,
            rhs: Value::ConstInt(0xFFFF_FFFF),
        },
    );
    Ok((masked, IrType::I64))
}

fn lower_lookup(ctx: &mut FnCtx, map_name: &str, args: &[Expr], span: Span) -> Result<(Value, IrType)> {
    let key_arg = args
        .first()
        .ok_or_else(|| Error::semantic(span, "lookup requires a key argument"))?;
    let key_ptr = resolve_key_or_value_ptr(ctx, key_arg, span)?;
    let map_ptr = map_ptr_value(ctx, map_name);
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(dst.clone()),
            ret_ty: IrType::OpaquePtr,
            arg_tys: vec![IrType::OpaquePtr, IrType::OpaquePtr],
            target: CallTarget::HelperId(HelperId::Lookup as i64),
            args: vec![map_ptr, key_ptr],
        },
    );
    Ok((dst, IrType::OpaquePtr))
}

fn lower_update(
    ctx: &mut FnCtx,
    map_name: &str,
    args: &[Expr],
    keywords: &[Keyword],
    span: Span,
) -> Result<(Value, IrType)> {
    let key_arg = args
        .first()
        .ok_or_else(|| Error::semantic(span, "update requires key and value arguments"))?;
    let value_arg = args
        .get(1)
        .ok_or_else(|| Error::semantic(span, "update requires key and value arguments"))?;
    let flags = args
        .get(2)
        .map(|e| match e {
            Expr::Int { value, .. } => *value,
            _ => 0,
        })
        .or_else(|| {
            keywords
                .iter()
                .find(|k| k.name == "flags")
                .and_then(|k| match &k.value {
                    Expr::Int { value, .. } => Some(*value),
                    _ => None,
                })
        })
        .unwrap_or(0);

    let key_ptr = resolve_key_or_value_ptr(ctx, key_arg, span)?;
    let value_ptr = resolve_key_or_value_ptr(ctx, value_arg, span)?;
    let map_ptr = map_ptr_value(ctx, map_name);
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(dst.clone()),
            ret_ty: IrType::I64,
            arg_tys: vec![IrType::OpaquePtr, IrType::OpaquePtr, IrType::OpaquePtr, IrType::I64],
            target: CallTarget::HelperId(HelperId::Update as i64),
            args: vec![map_ptr, key_ptr, value_ptr, Value::ConstInt(flags)],
        },
    );
    Ok((dst, IrType::I64))
}

fn lower_delete(ctx: &mut FnCtx, map_name: &str, args: &[Expr], span: Span) -> Result<(Value, IrType)> {
    let key_arg = args
        .first()
        .ok_or_else(|| Error::semantic(span, "delete requires a key argument"))?;
    let key_ptr = resolve_key_or_value_ptr(ctx, key_arg, span)?;
    let map_ptr = map_ptr_value(ctx, map_name);
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(dst.clone()),
            ret_ty: IrType::I64,
            arg_tys: vec![IrType::OpaquePtr, IrType::OpaquePtr],
            target: CallTarget::HelperId(HelperId::Delete as i64),
            args: vec![map_ptr, key_ptr],
        },
    );
    Ok((dst, IrType::I64))
}

fn lower_perf_output(ctx: &mut FnCtx, map_name: &str, args: &[Expr], span: Span) -> Result<(Value, IrType)> {
    let instance_arg = args
        .first()
        .ok_or_else(|| Error::semantic(span, "output requires a struct instance argument"))?;
    let name = match instance_arg {
        Expr::Name { id, .. } => id.clone(),
        _ => return Err(Error::semantic(span, "output argument must be a struct-instance local")),
    };
    let local = ctx
        .resolve_local(&name)
        .ok_or_else(|| Error::semantic(span, format!("undefined name `{}`", name)))?
        .clone();
    let struct_name = local
        .struct_name
        .clone()
        .ok_or_else(|| Error::semantic(span, "output argument must be a struct instance"))?;
    let size = ctx
        .struct_table
        .get(&struct_name)
        .map(|d| d.size)
        .unwrap_or(0);

    let map_ptr = map_ptr_value(ctx, map_name);
    let instance_ptr = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::BitCast {
            dst: instance_ptr.clone(),
            from: IrType::Struct(struct_name).ptr_to(),
            to: IrType::OpaquePtr,
            val: local.ptr.clone(),
        },
    );
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(dst.clone()),
            ret_ty: IrType::I64,
            arg_tys: vec![IrType::OpaquePtr, IrType::OpaquePtr, IrType::I64],
            target: CallTarget::HelperId(HelperId::PerfOutput as i64),
            args: vec![map_ptr, instance_ptr, Value::ConstInt(size as i64)],
        },
    );
    Ok((dst, IrType::I64))
}

/// Chooses a `printf`-style format specifier for an argument by its static IR type
/// (SPEC_FULL §4.5: 32-bit integer → `%d`, 64-bit integer → `%lld`, pointer-to-byte → `%s`).
fn format_specifier(ty: &IrType) -> &'static str {
    match ty {
        IrType::Int(32) => "%d",
        IrType::Int(8) | IrType::Ptr(_) => "%s",
        _ => "%lld",
    }
}

fn lower_print(ctx: &mut FnCtx, args: &[Expr], span: Span) -> Result<(Value, IrType)> {
    let message = args
        .first()
        .ok_or_else(|| Error::semantic(span, "print requires a format argument"))?;

    let (mut literal, interps): (String, Vec<&Expr>) = match message {
        Expr::Str { value, .. } => (value.clone(), Vec::new()),
        Expr::FString { parts, .. } => {
            let mut literal = String::new();
            let mut interps = Vec::new();
            for part in parts {
                match part {
                    FStringPart::Literal(s) => literal.push_str(s),
                    FStringPart::Interp(e) => interps.push(e),
                }
            }
            (literal, interps)
        }
        _ => return Err(Error::semantic(span, "print requires a string or f-string literal")),
    };

    // SPEC_FULL testable property 10: at most 3 substitutions forwarded; extra are dropped
    // with a warning. The format string itself still needs one specifier per *kept*
    // interpolation, each evaluated so the correct specifier is chosen by static type.
    let mut evaluated = Vec::new();
    for (i, interp) in interps.iter().enumerate() {
        if i >= 3 {
            log::warn!("print: more than 3 substitution arguments, dropping the rest");
            break;
        }
        let (val, ty) = expr::eval(ctx, interp)?;
        literal.push_str(format_specifier(&ty));
        evaluated.push((val, ty));
    }
    literal.push_str("\n");

    let mut bytes = literal.into_bytes();
    bytes.push(0);
    let const_name = format!("__fmt_{}", ctx.module.globals.len());
    let len = bytes.len() as i64;
    ctx.module.globals.push(crate::ir::Global {
        name: const_name.clone(),
        ty: IrType::Array(Box::new(IrType::I8), bytes.len() as u32),
        linkage: Linkage::Internal,
        section: None,
        align: 1,
        initializer: Initializer::CStr(bytes),
        is_constant: true,
        dbg_metadata: None,
    });

    let fmt_ptr = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::BitCast {
            dst: fmt_ptr.clone(),
            from: IrType::Array(Box::new(IrType::I8), len as u32).ptr_to(),
            to: IrType::OpaquePtr,
            val: Value::Global(const_name),
        },
    );

    let mut arg_tys = vec![IrType::OpaquePtr, IrType::I64];
    let mut call_args = vec![fmt_ptr, Value::ConstInt(len)];
    for (val, ty) in evaluated {
        arg_tys.push(ty);
        call_args.push(val);
    }

    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::Call {
            dst: Some(dst.clone()),
            ret_ty: IrType::I64,
            arg_tys,
            target: CallTarget::HelperId(HelperId::Print as i64),
            args: call_args,
        },
    );
    Ok((dst, IrType::I64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_ids_match_spec() {
        assert_eq!(HelperId::Lookup as i64, 1);
        assert_eq!(HelperId::Update as i64, 2);
        assert_eq!(HelperId::Delete as i64, 3);
        assert_eq!(HelperId::Ktime as i64, 5);
        assert_eq!(HelperId::Print as i64, 6);
        assert_eq!(HelperId::Pid as i64, 14);
        assert_eq!(HelperId::PerfOutput as i64, 25);
    }

    #[test]
    fn format_specifier_chooses_by_type() {
        assert_eq!(format_specifier(&IrType::Int(32)), "%d");
        assert_eq!(format_specifier(&IrType::I64), "%lld");
        assert_eq!(format_specifier(&IrType::byte_ptr()), "%s");
    }
}
