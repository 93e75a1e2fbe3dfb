use super::*;
use crate::ir::opcode;

fn ops(src: &str) -> Vec<i32> {
    parse(src).unwrap().iter().map(|i| i.op).collect()
}

#[test]
fn simple_function_emits_begin_and_define_funct() {
    let program = parse("defun f(x) { return x; }").unwrap();
    assert_eq!(program.get(0).unwrap().op, opcode::BEGIN_FUNCT);
    assert_eq!(program.get(program.len() - 1).unwrap().op, opcode::DEFINE_FUNCT);
}

#[test]
fn if_else_emits_two_labels() {
    let program = parse("defun f(x) { if (x > 0) return 1; else return 0; }").unwrap();
    let set_labels = program.iter().filter(|i| i.op == opcode::SET_LABEL).count();
    assert_eq!(set_labels, 2);
}

#[test]
fn while_loop_has_begin_and_end_loop() {
    let program = parse("defun f(x) { while (x > 0) { x = x - 1; } }").unwrap();
    assert!(program.iter().any(|i| i.op == opcode::BEGIN_LOOP));
    assert!(program.iter().any(|i| i.op == opcode::END_LOOP));
}

#[test]
fn short_circuit_and_chain_has_single_set_label_for_the_chain() {
    let program = parse("defun h(x,y,z) { return x && y && z; }").unwrap();
    let labels: Vec<i32> = program
        .iter()
        .filter(|i| i.op == opcode::SET_LABEL)
        .filter_map(|i| i.arg1)
        .collect();
    // one chain => exactly one SET_LABEL belonging to the chain's end.
    assert_eq!(labels.len(), 1);
}

#[test]
fn ternary_emits_both_branch_markers() {
    let program = parse("defun f(x) { return x > 0 ? 1 : 0; }").unwrap();
    assert!(program.iter().any(|i| i.op == opcode::OP && i.arg1 == Some(subop::TERNARY_START)));
    assert!(program.iter().any(|i| i.op == opcode::OP && i.arg1 == Some(subop::TERNARY_ELSE_END)));
}

#[test]
fn empty_list_literal_emits_zero_arity_build_list() {
    let insts = ops("decl a; a = {};");
    assert!(insts.contains(&opcode::OP));
}

#[test]
fn unit_multiplication_emits_real_and_mul() {
    let program = parse("decl w; w = 5 um;").unwrap();
    assert!(program.iter().any(|i| i.op == opcode::LOAD_REAL));
    assert!(program
        .iter()
        .any(|i| i.op == opcode::OP && i.arg1 == Some(subop::MUL)));
}

#[test]
fn switch_statement_emits_dispatch_skeleton() {
    let program = parse("defun f(x) { switch(x){ case 1: x; break; default: x; } }").unwrap();
    assert!(program.iter().any(|i| i.op == opcode::BRANCH_TABLE));
    assert!(program.iter().any(|i| i.op == opcode::ADD_CASE));
    assert!(program.iter().any(|i| i.op == opcode::SET_LOOP_DEFAULT));
}

#[test]
fn decl_with_initializer_emits_assign_and_stmt_end() {
    let program = parse("decl a = 5;").unwrap();
    assert!(program
        .iter()
        .any(|i| i.op == opcode::OP && i.arg1 == Some(subop::ASSIGN)));
    assert!(program.iter().any(|i| i.op == opcode::STMT_END));
}
