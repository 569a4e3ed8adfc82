//! Binary/comparison operator lowering (SPEC_FULL §4.7). Grounded on
//! `original_source/pythonbpf/binary_ops.py`.

use crate::ast::{BinOpKind, CmpOpKind, Expr};
use crate::context::FnCtx;
use crate::error::{Error, Result};
use crate::expr;
use crate::ir::{Instruction, IntBinOp, IntPred, Value};
use crate::types::IrType;

/// Checks that a value is already a primitive integer, with no pointer peeling. Used by
/// `eval_compare`'s non-pointer branch, where a bare pointer operand is handled specially
/// before this is ever reached.
fn require_primitive_int(ty: &IrType, span: crate::error::Span) -> Result<()> {
    match ty {
        IrType::Int(_) => Ok(()),
        _ => Err(Error::semantic(span, "mixed integer/pointer operand in binary operator")),
    }
}

/// Recursively dereferences `val` until a primitive integer is obtained, loading through each
/// pointer indirection in turn (SPEC_FULL §4.7 sentence 1, mirroring
/// `original_source/pythonbpf/binary_ops.py::recursive_dereferencer`). A map-lookup result used
/// directly in arithmetic (`prev + 1`, `kt - tsp`) is exactly the case this exists for; an
/// opaque pointer with no recorded pointee loads as a 64-bit integer, the same default
/// `eval_deref` uses. Anything that bottoms out as neither an integer nor a pointer (a struct or
/// array operand) is still a hard error.
fn dereference_to_primitive(
    ctx: &mut FnCtx,
    mut val: Value,
    mut ty: IrType,
    span: crate::error::Span,
) -> Result<(Value, IrType)> {
    loop {
        match ty {
            IrType::Int(_) => return Ok((val, ty)),
            IrType::Ptr(inner) => {
                let dst = ctx.func.fresh_reg();
                ctx.func.push(
                    ctx.block,
                    Instruction::Load { dst: dst.clone(), ty: (*inner).clone(), ptr: val },
                );
                val = dst;
                ty = *inner;
            }
            IrType::OpaquePtr => {
                let dst = ctx.func.fresh_reg();
                ctx.func.push(
                    ctx.block,
                    Instruction::Load { dst: dst.clone(), ty: IrType::I64, ptr: val },
                );
                val = dst;
                ty = IrType::I64;
            }
            _ => {
                return Err(Error::semantic(
                    span,
                    "mixed integer/pointer operand in binary operator",
                ))
            }
        }
    }
}

fn int_width(ty: &IrType) -> u32 {
    match ty {
        IrType::Int(bits) => *bits,
        _ => 64,
    }
}

/// Sign-extends `val` from `from` to `to` if they differ in width, otherwise passes it through.
fn equalize_width(
    ctx: &mut FnCtx,
    val: Value,
    from: &IrType,
    to_bits: u32,
) -> Value {
    let from_bits = int_width(from);
    if from_bits >= to_bits {
        return val;
    }
    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::SExt {
            dst: dst.clone(),
            from: from.clone(),
            to: IrType::Int(to_bits),
            val,
        },
    );
    dst
}

fn binop_instruction(op: BinOpKind) -> IntBinOp {
    match op {
        BinOpKind::Add => IntBinOp::Add,
        BinOpKind::Sub => IntBinOp::Sub,
        BinOpKind::Mul => IntBinOp::Mul,
        BinOpKind::Div => IntBinOp::SDiv,
        BinOpKind::Mod => IntBinOp::SRem,
        BinOpKind::Shl => IntBinOp::Shl,
        BinOpKind::Shr => IntBinOp::LShr,
        BinOpKind::BitOr => IntBinOp::Or,
        BinOpKind::BitXor => IntBinOp::Xor,
        BinOpKind::BitAnd => IntBinOp::And,
        BinOpKind::FloorDiv => IntBinOp::UDiv,
    }
}

pub fn eval_binop(ctx: &mut FnCtx, expr: &Expr) -> Result<(Value, IrType)> {
    let (op, left, right, span) = match expr {
        Expr::BinOp { op, left, right, span } => (*op, left.as_ref(), right.as_ref(), *span),
        _ => unreachable!("eval_binop called on a non-BinOp expression"),
    };

    let (lval, lty) = crate::expr::eval(ctx, left)?;
    let (rval, rty) = crate::expr::eval(ctx, right)?;
    let (lval, lty) = dereference_to_primitive(ctx, lval, lty, span)?;
    let (rval, rty) = dereference_to_primitive(ctx, rval, rty, span)?;

    let width = int_width(&lty).max(int_width(&rty)).max(64);
    let lval = equalize_width(ctx, lval, &lty, width);
    let rval = equalize_width(ctx, rval, &rty, width);

    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::BinOp {
            dst: dst.clone(),
            op: binop_instruction(op),
            ty: IrType::Int(width),
            lhs: lval,
            rhs: rval,
        },
    );
    Ok((dst, IrType::Int(width)))
}

fn cmp_predicate(op: CmpOpKind) -> IntPred {
    match op {
        CmpOpKind::Eq => IntPred::Eq,
        CmpOpKind::Ne => IntPred::Ne,
        CmpOpKind::Lt => IntPred::Slt,
        CmpOpKind::Le => IntPred::Sle,
        CmpOpKind::Gt => IntPred::Sgt,
        CmpOpKind::Ge => IntPred::Sge,
    }
}

/// Lowers a two-operand comparison to a signed `icmp`, equalizing operand widths by sign
/// extension (SPEC_FULL §4.7, §4.8.3). Unlike `eval_binop`, an operand may legitimately be an
/// opaque pointer (a map-lookup result compared against `null`); that case is handled
/// specially rather than coerced into an integer compare.
pub fn eval_compare(ctx: &mut FnCtx, expr: &Expr) -> Result<(Value, IrType)> {
    let (op, left, right, span) = match expr {
        Expr::Compare { op, left, right, span } => (*op, left.as_ref(), right.as_ref(), *span),
        _ => unreachable!("eval_compare called on a non-Compare expression"),
    };

    let (lval, lty) = expr::eval(ctx, left)?;
    let (rval, rty) = expr::eval(ctx, right)?;

    // A pointer compared with the integer literal 0 is the explicit null-truthiness idiom
    // SPEC_FULL §9 resolves as required rather than implicit (e.g. `if lookup(0):` is not
    // accepted; `if lookup(0) != 0:` is).
    let is_ptr_cmp = matches!(lty, IrType::OpaquePtr | IrType::Ptr(_))
        || matches!(rty, IrType::OpaquePtr | IrType::Ptr(_));
    if is_ptr_cmp {
        let pred = cmp_predicate(op);
        let dst = ctx.func.fresh_reg();
        ctx.func.push(
            ctx.block,
            Instruction::ICmp {
                dst: dst.clone(),
                pred,
                ty: IrType::OpaquePtr,
                lhs: lval,
                rhs: rval,
            },
        );
        return Ok((dst, IrType::I1));
    }

    require_primitive_int(&lty, span)?;
    require_primitive_int(&rty, span)?;
    let width = int_width(&lty).max(int_width(&rty));
    let lval = equalize_width(ctx, lval, &lty, width);
    let rval = equalize_width(ctx, rval, &rty, width);

    let dst = ctx.func.fresh_reg();
    ctx.func.push(
        ctx.block,
        Instruction::ICmp {
            dst: dst.clone(),
            pred: cmp_predicate(op),
            ty: IrType::Int(width),
            lhs: lval,
            rhs: rval,
        },
    );
    Ok((dst, IrType::I1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_div_lowers_to_unsigned_div() {
        assert_eq!(binop_instruction(BinOpKind::FloorDiv), IntBinOp::UDiv);
        assert_eq!(binop_instruction(BinOpKind::Div), IntBinOp::SDiv);
    }

    #[test]
    fn xor_and_and_lower_correctly() {
        assert_eq!(binop_instruction(BinOpKind::BitXor), IntBinOp::Xor);
        assert_eq!(binop_instruction(BinOpKind::BitAnd), IntBinOp::And);
    }
}
