//! # Load handlers
//!
//! Each load opcode pushes a fresh [`Expr`] onto the expression's working
//! stack (spec §4.5.2).

use crate::ir::{opcode, Instruction};
use crate::reconstruct::expr::{Expr, ExprKind};

/// Pushes the `Expr` for `inst` onto `stack` and returns `true`, or
/// returns `false` without touching `stack` if `inst` is not a load op.
pub fn handle(inst: &Instruction, stack: &mut Vec<Expr>) -> bool {
    let kind = match inst.op {
        opcode::LOAD_INT => ExprKind::Int(inst.arg1.unwrap_or(0) as i64),
        opcode::LOAD_STR => ExprKind::Str(inst.str.clone().unwrap_or_default()),
        opcode::LOAD_BOOL => ExprKind::Bool(inst.arg1.unwrap_or(0) != 0),
        opcode::LOAD_TRUE => ExprKind::Bool(true),
        opcode::LOAD_REAL => ExprKind::Real(inst.num.unwrap_or(0.0)),
        opcode::LOAD_IMAG => ExprKind::Imag(inst.num.unwrap_or(0.0)),
        opcode::LOAD_NULL => ExprKind::Null,
        opcode::LOAD_VAR => {
            let name = String::from_utf8_lossy(inst.str.as_deref().unwrap_or(b"")).into_owned();
            ExprKind::Var(name)
        }
        _ => return false,
    };
    stack.push(Expr::new(kind).with_pos(inst.pos()));
    true
}
