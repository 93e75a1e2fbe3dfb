//! # Ternary and short-circuit expression templates
//!
//! Both are pure expression producers (spec §4.5.3): by the time the
//! reconstructor's RPN evaluator reaches their marker opcodes, every
//! operand they need has already been reduced onto the working stack or
//! is reachable by recursing into [`crate::reconstruct::consume_expr`].
//! These two consumers are the only place the evaluator has to step past
//! label/branch bookkeeping that is not itself an expression value.

use crate::error::AelError;
use crate::ir::{opcode, subop, Program};
use crate::reconstruct::consume_expr;
use crate::reconstruct::expr::{Expr, ExprKind};

/// True when `idx` sits on an `OP=48 arg1=59` (`TERNARY_START`) marker
/// followed by exactly two `ADD_LABEL` instructions — the if-header
/// variant has only one (spec §4.5.3 distinguishes the two by this
/// count).
pub fn looks_like_ternary(program: &Program, idx: usize) -> bool {
    is_marker(program, idx, subop::TERNARY_START)
        && program.get(idx + 1).map(|i| i.op) == Some(opcode::ADD_LABEL)
        && program.get(idx + 2).map(|i| i.op) == Some(opcode::ADD_LABEL)
}

pub fn looks_like_if_header(program: &Program, idx: usize) -> bool {
    is_marker(program, idx, subop::TERNARY_START)
        && program.get(idx + 1).map(|i| i.op) == Some(opcode::ADD_LABEL)
        && program.get(idx + 2).map(|i| i.op) != Some(opcode::ADD_LABEL)
}

fn is_marker(program: &Program, idx: usize, sub: i32) -> bool {
    program
        .get(idx)
        .map(|i| i.op == opcode::OP && i.arg1 == Some(sub))
        .unwrap_or(false)
}

/// `OP=59;ADD_LABEL;ADD_LABEL;OP=3;BRANCH_TRUE false;OP=61;<then>;OP=60;
/// LOAD_TRUE;BRANCH_TRUE end;SET_LABEL false;<else>;OP=65;SET_LABEL end`.
pub fn consume_ternary(program: &Program, idx: &mut usize, stack: &mut Vec<Expr>) -> Result<Expr, AelError> {
    let start_pos = program[*idx].pos();
    let cond = stack.pop().ok_or_else(|| underflow(*idx, program[*idx].op, stack.len()))?;

    *idx += 3; // OP=59, ADD_LABEL, ADD_LABEL
    *idx += 1; // OP=3 (COND_TEST)
    let false_label = program[*idx].arg1.unwrap_or(-1);
    *idx += 1; // BRANCH_TRUE false

    *idx += 1; // OP=61 (THEN_START)
    let then_expr = consume_expr(program, idx)?;
    *idx += 1; // OP=60 (THEN_END)
    *idx += 1; // LOAD_TRUE
    let end_label_inst = &program[*idx];
    let _end_label = end_label_inst.arg1.unwrap_or(-1);
    *idx += 1; // BRANCH_TRUE end
    expect_set_label(program, idx, false_label)?;

    let else_expr = consume_expr(program, idx)?;
    *idx += 1; // OP=65 (ELSE_END)
    expect_set_label(program, idx, _end_label)?;

    Ok(Expr::new(ExprKind::Ternary(Box::new(cond), Box::new(then_expr), Box::new(else_expr))).with_pos(start_pos))
}

fn expect_set_label(program: &Program, idx: &mut usize, _label: i32) -> Result<(), AelError> {
    if program.get(*idx).map(|i| i.op) != Some(opcode::SET_LABEL) {
        return Err(AelError::TemplateFatal {
            ir_index: *idx,
            message: "expected SET_LABEL while closing ternary".to_string(),
        });
    }
    *idx += 1;
    Ok(())
}

fn underflow(idx: usize, op: i32, depth: usize) -> AelError {
    AelError::StackUnderflow { ir_index: idx, op, depth }
}

/// Detects `ADD_LABEL; OP=48 arg1∈{62,63}` — a short-circuit chain start.
pub fn looks_like_short_circuit(program: &Program, idx: usize) -> Option<i32> {
    if program.get(idx).map(|i| i.op) != Some(opcode::ADD_LABEL) {
        return None;
    }
    match program.get(idx + 1) {
        Some(i) if i.op == opcode::OP && (i.arg1 == Some(62) || i.arg1 == Some(63)) => i.arg1,
        _ => None,
    }
}

/// `ADD_LABEL; OP=marker; BEGIN_LOOP; [OP=3 if &&]; BRANCH_TRUE end;
/// STMT_END; OP=marker; <rhs>; (OP=marker; <rhs>)*; OP=marker;
/// SET_LABEL end; OP=18|19`.
pub fn consume_short_circuit(
    program: &Program,
    idx: &mut usize,
    stack: &mut Vec<Expr>,
    marker: i32,
) -> Result<Expr, AelError> {
    let lhs = stack.pop().ok_or_else(|| underflow(*idx, program[*idx].op, stack.len()))?;
    let anchor_pos = program[*idx + 1].pos();
    let is_and = marker == 62;

    *idx += 2; // ADD_LABEL, OP=marker (#1)
    *idx += 1; // BEGIN_LOOP
    if is_and {
        *idx += 1; // OP=3 (COND_TEST)
    }
    let end_label = program[*idx].arg1.unwrap_or(-1);
    *idx += 1; // BRANCH_TRUE end
    *idx += 1; // STMT_END
    *idx += 1; // OP=marker (#2)

    let mut operands = vec![lhs];
    loop {
        let operand = consume_expr(program, idx)?;
        operands.push(operand);

        let is_marker_here = program.get(*idx).map(|i| i.op == opcode::OP && i.arg1 == Some(marker)).unwrap_or(false);
        if !is_marker_here {
            return Err(AelError::TemplateFatal {
                ir_index: *idx,
                message: "short-circuit chain missing marker".to_string(),
            });
        }
        *idx += 1; // consume this marker
        let is_final = program.get(*idx).map(|i| i.op == opcode::SET_LABEL && i.arg1 == Some(end_label)).unwrap_or(false);
        if is_final {
            *idx += 1; // SET_LABEL end
            break;
        }
    }

    let sub = if is_and { subop::LOGICAL_AND } else { subop::LOGICAL_OR };
    *idx += 1; // OP=sub (AND/OR)

    let mut it = operands.into_iter();
    let mut acc = it.next().unwrap();
    for rhs in it {
        acc = Expr::new(ExprKind::BinOp(sub, Box::new(acc), Box::new(rhs))).with_pos(anchor_pos);
    }
    Ok(acc)
}

/// Break/continue detection: `LOAD_TRUE; LOOP_EXIT; BRANCH_TRUE x` or
/// `LOAD_TRUE; LOOP_AGAIN; BRANCH_TRUE x` (spec §4.5.3). Only fires when
/// the *current* instruction is `LOAD_TRUE` and has not already been
/// claimed as a boolean literal by an enclosing expression context —
/// callers only probe this at statement position.
pub fn looks_like_break(program: &Program, idx: usize) -> bool {
    program.get(idx).map(|i| i.op) == Some(opcode::LOAD_TRUE)
        && program.get(idx + 1).map(|i| i.op) == Some(opcode::LOOP_EXIT)
        && program.get(idx + 2).map(|i| i.op) == Some(opcode::BRANCH_TRUE)
}

pub fn looks_like_continue(program: &Program, idx: usize) -> bool {
    program.get(idx).map(|i| i.op) == Some(opcode::LOAD_TRUE)
        && program.get(idx + 1).map(|i| i.op) == Some(opcode::LOOP_AGAIN)
        && program.get(idx + 2).map(|i| i.op) == Some(opcode::BRANCH_TRUE)
}

pub fn skip_break_or_continue(idx: &mut usize) {
    *idx += 3;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn ternary_is_detected_after_parsing() {
        let program = parse("defun f(x) { return x > 0 ? 1 : 0; }").unwrap();
        let idx = program
            .iter()
            .position(|i| i.op == opcode::OP && i.arg1 == Some(subop::TERNARY_START))
            .unwrap();
        assert!(looks_like_ternary(&program, idx) || looks_like_if_header(&program, idx));
    }
}
