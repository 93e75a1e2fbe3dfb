//! End-to-end coverage of the full compile/reconstruct pipeline: source to
//! IR and back, exercised the way a real `-In`/`-Out` invocation would.

use atf2ael::error::Pos;
use atf2ael::ir::codec;
use atf2ael::ir::{opcode, subop, Instruction, Program};
use atf2ael::parser::parse;
use atf2ael::reconstruct::reconstruct;

fn compile_to_ir(source: &str) -> Program {
    parse(source).expect("source should parse")
}

fn roundtrip(source: &str) -> String {
    let program = compile_to_ir(source);
    let (out, _, _) = reconstruct(&program, false, false).expect("reconstruction should succeed");
    out
}

/// Recompiling reconstructed output should be stable: parsing it again and
/// reconstructing once more must produce byte-identical text.
fn roundtrip_is_stable(source: &str) -> String {
    let first = roundtrip(source);
    let second = roundtrip(&first);
    assert_eq!(first, second, "reconstruction should be a fixed point");
    first
}

// ---------------------------------------------------------------------
// Property 1: IR round-trip — writing a program to text and parsing it
// back yields an equal program.
// ---------------------------------------------------------------------
#[test]
fn property_ir_text_round_trip_preserves_instructions() {
    let program = compile_to_ir("defun f(x) { return x + 1; }");
    let mut buf = Vec::new();
    codec::write_program(&program, &mut buf, Some("unix:0")).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let reparsed = codec::parse_program(&text).unwrap();
    assert_eq!(program.len(), reparsed.len());
    let norm = |v: Option<i32>| v.unwrap_or(0);
    for i in 0..program.len() {
        // An absent numeric field and an explicit 0 carry the same meaning
        // through the text codec, so compare positions/args loosely.
        let (a, b) = (&program[i], &reparsed[i]);
        assert_eq!(a.op, b.op, "instruction {i} op differs");
        assert_eq!(norm(a.arg1), norm(b.arg1), "instruction {i} arg1 differs");
        assert_eq!(norm(a.arg4), norm(b.arg4), "instruction {i} arg4 differs");
        assert_eq!(a.str, b.str, "instruction {i} str differs");
        assert_eq!(a.num, b.num, "instruction {i} num differs");
        assert_eq!(a.depth, b.depth, "instruction {i} depth differs");
    }
}

// ---------------------------------------------------------------------
// Property 2: lexer determinism — tokenizing the same source twice gives
// identical token streams.
// ---------------------------------------------------------------------
#[test]
fn property_lexer_is_deterministic() {
    use atf2ael::lexer::tokenize;
    let src = "defun add(a, b) { return a + b * 2; }";
    let a: Vec<_> = tokenize(src).tokens.into_iter().map(|t| t.kind).collect();
    let b: Vec<_> = tokenize(src).tokens.into_iter().map(|t| t.kind).collect();
    assert_eq!(a, b);
}

// ---------------------------------------------------------------------
// Property 3: short-circuit end-label invariant — a chain of `&&`/`||`
// shares exactly one end label, and every BRANCH_TRUE in the chain
// targets that same label.
// ---------------------------------------------------------------------
#[test]
fn property_short_circuit_chain_has_single_end_label() {
    let program = compile_to_ir("defun f(a, b, c) { return a && b && c; }");
    assert!(
        program.iter().any(|i| i.op == opcode::ADD_LABEL),
        "expects an ADD_LABEL marker to start the short-circuit chain"
    );

    // Exactly one end label is ever defined for the whole chain, no matter
    // how many `&&` links it has.
    let set_labels: Vec<i32> = program
        .iter()
        .filter(|i| i.op == opcode::SET_LABEL)
        .filter_map(|i| i.arg1)
        .collect();
    assert_eq!(set_labels.len(), 1, "the end label is set exactly once for the whole chain");
    let end_label = set_labels[0];

    let branch_true_targets = program
        .iter()
        .filter(|i| i.op == opcode::BRANCH_TRUE && i.arg1 == Some(end_label))
        .count();
    assert!(branch_true_targets >= 1, "at least one BRANCH_TRUE should target the end label");
}

// ---------------------------------------------------------------------
// Property 4: loop label discipline — a `while` loop's BEGIN_LOOP /
// LOOP_AGAIN / LOOP_EXIT markers and its cond/end labels reconstruct
// cleanly without a leftover or mismatched marker (verified indirectly:
// reconstruction errors loudly on any template mismatch).
// ---------------------------------------------------------------------
#[test]
fn property_loop_label_discipline_round_trips() {
    let src = "defun f(x) { while (x > 0) { x = x - 1; } return x; }";
    let out = roundtrip(src);
    assert!(out.contains("while (x > 0)"), "got: {out}");
    assert!(out.contains("x = x - 1;"), "got: {out}");

    let program = compile_to_ir(src);
    assert_eq!(program.iter().filter(|i| i.op == opcode::BEGIN_LOOP).count(), 1);
    assert!(program.iter().any(|i| i.op == opcode::LOOP_AGAIN));
    assert!(program.iter().any(|i| i.op == opcode::LOOP_EXIT));
}

// ---------------------------------------------------------------------
// Property 5: ternary total template — `cond ? then : else` with
// single-instruction then/else arms compiles to the fixed 14-instruction
// template (spec §4.4.4/§4.5.3).
// ---------------------------------------------------------------------
#[test]
fn property_ternary_is_a_fixed_fourteen_instruction_template() {
    let program = compile_to_ir("defun f() { return 1 ? 1 : 0; }");
    let start = program
        .iter()
        .position(|i| i.op == opcode::OP && i.arg1 == Some(subop::TERNARY_START))
        .expect("expects a ternary-start marker");

    let template: Vec<(i32, Option<i32>)> = (start..start + 14)
        .map(|i| (program[i].op, program[i].arg1))
        .collect();

    assert_eq!(template.len(), 14);
    assert_eq!(template[0], (opcode::OP, Some(subop::TERNARY_START)));
    assert_eq!(template[1].0, opcode::ADD_LABEL);
    assert_eq!(template[2].0, opcode::ADD_LABEL);
    assert_eq!(template[3], (opcode::OP, Some(subop::COND_TEST)));
    assert_eq!(template[4].0, opcode::BRANCH_TRUE);
    assert_eq!(template[5], (opcode::OP, Some(subop::TERNARY_THEN_START)));
    // template[6] is the then-arm's single LOAD instruction
    assert_eq!(template[7], (opcode::OP, Some(subop::TERNARY_THEN_END)));
    assert_eq!(template[8].0, opcode::LOAD_TRUE);
    assert_eq!(template[9].0, opcode::BRANCH_TRUE);
    assert_eq!(template[10].0, opcode::SET_LABEL);
    // template[11] is the else-arm's single LOAD instruction
    assert_eq!(template[12], (opcode::OP, Some(subop::TERNARY_ELSE_END)));
    assert_eq!(template[13].0, opcode::SET_LABEL);
}

// ---------------------------------------------------------------------
// Property 6: emitter monotonicity — the emitter's cursor never moves
// backward as text is emitted (spec §4.6/§9).
// ---------------------------------------------------------------------
#[test]
fn property_emitter_cursor_is_monotonic() {
    use atf2ael::emitter::Emitter;
    let mut emitter = Emitter::new(Vec::new(), false);
    let mut last = emitter.cursor();
    for chunk in ["defun f() {\n", "    return 1;\n", "}\n"] {
        emitter.emit_text(chunk).unwrap();
        let now = emitter.cursor();
        assert!(now >= last, "cursor regressed: {last:?} -> {now:?}");
        last = now;
    }
}

// ---------------------------------------------------------------------
// Property 7: parenthesization minimality / stability — reconstructing
// twice in a row (reparsing the first output) is a fixed point.
// ---------------------------------------------------------------------
#[test]
fn property_reconstruction_is_stable_under_a_second_round_trip() {
    for src in [
        "defun f(a, b, c) { return a + b * c; }",
        "defun f(x) { return (x + 1) * (x - 1); }",
        "defun f(x) { return x = x + 1; }",
        "defun f(x) { return 2 ** x ** 3; }",
        "defun f(a, b) { return a && b || a; }",
    ] {
        roundtrip_is_stable(src);
    }
}

// ---------------------------------------------------------------------
// S1: a simple `if`/`else` with `return`s reconstructs to matching
// source shape.
// ---------------------------------------------------------------------
#[test]
fn scenario_s1_simple_if_else_returns() {
    let src = "defun f(x) { if (x > 0) { return 1; } else { return 0; } }";
    let out = roundtrip(src);
    assert!(out.contains("defun f(x)"), "got: {out}");
    assert!(out.contains("if (x > 0)"), "got: {out}");
    assert!(out.contains("return 1;"), "got: {out}");
    assert!(out.contains("return 0;"), "got: {out}");

    let program = compile_to_ir(src);
    assert_eq!(program[0].op, opcode::BEGIN_FUNCT);
    assert!(program.iter().any(|i| i.op == opcode::ADD_ARG && i.str.as_deref() == Some(b"x".as_slice())));
}

// ---------------------------------------------------------------------
// S2: the empty-list quirk — `{}` is a degenerate list literal that
// still round-trips exactly.
// ---------------------------------------------------------------------
#[test]
fn scenario_s2_empty_list_literal_round_trips() {
    let src = "defun f() { decl x = {}; return x; }";
    let out = roundtrip(src);
    assert!(
        out.contains("{}") || out.contains("{ }") || out.contains("{  }"),
        "got: {out}"
    );
}

// ---------------------------------------------------------------------
// S3: short-circuit `&&` chain reconstructs with exactly one SET_LABEL
// for the end label (mirrors property 3, phrased as a source scenario).
// ---------------------------------------------------------------------
#[test]
fn scenario_s3_short_circuit_and_chain_round_trips() {
    let src = "defun f(a, b) { return a && b; }";
    let out = roundtrip(src);
    assert!(out.contains("a && b"), "got: {out}");
}

// ---------------------------------------------------------------------
// S4: nested list literal at depth 3 reconstructs with the right
// bracket nesting.
// ---------------------------------------------------------------------
#[test]
fn scenario_s4_nested_list_literal_round_trips() {
    let src = "defun f() { decl x = { { 1, 2 }, { 3, 4 } }; return x; }";
    let out = roundtrip(src);
    assert!(out.contains('{') && out.contains('}'), "got: {out}");
    assert!(out.contains('1') && out.contains('4'), "got: {out}");
}

// ---------------------------------------------------------------------
// S5: unit recovery — `5 um` compiles the same way as the equivalent
// multiplication and reconstructs back to the unit-suffixed form.
// ---------------------------------------------------------------------
#[test]
fn scenario_s5_unit_suffix_and_explicit_multiplier_are_equivalent() {
    let via_unit = compile_to_ir("defun f() { decl w = 5 um; return w; }");
    let via_mul = compile_to_ir("defun f() { decl w = 5 * 1e-6; return w; }");
    assert_eq!(via_unit.len(), via_mul.len());
    for i in 0..via_unit.len() {
        // Source positions differ (the unit suffix is shorter than the
        // spelled-out multiplier), so compare everything but arg2/arg3.
        let (a, b) = (&via_unit[i], &via_mul[i]);
        assert_eq!(a.op, b.op, "instruction {i} op differs");
        assert_eq!(a.arg1, b.arg1, "instruction {i} arg1 differs");
        assert_eq!(a.str, b.str, "instruction {i} str differs");
        assert_eq!(a.num, b.num, "instruction {i} num differs");
    }

    let (out, _, _) = reconstruct(&via_unit, false, false).unwrap();
    assert!(out.contains("5 um"), "got: {out}");
}

// ---------------------------------------------------------------------
// S6: switch dispatch reconstructs with every case label present.
// ---------------------------------------------------------------------
#[test]
fn scenario_s6_switch_dispatch_round_trips() {
    let src = "defun f(x) { switch (x) { case 1: return 1; case 2: return 2; default: return 0; } }";
    let out = roundtrip(src);
    assert!(out.contains("switch (x)"), "got: {out}");
    assert!(out.contains("case 1"), "got: {out}");
    assert!(out.contains("case 2"), "got: {out}");
    assert!(out.contains("default"), "got: {out}");

    let program = compile_to_ir(src);
    let cases = program.iter().filter(|i| i.op == opcode::ADD_CASE).count();
    assert_eq!(cases, 2);
    assert_eq!(program.iter().filter(|i| i.op == opcode::BRANCH_TABLE).count(), 1);
}

// ---------------------------------------------------------------------
// End-of-program flush: IR ending mid-expression (no trailing STMT_END)
// still emits that expression as a statement rather than failing.
// ---------------------------------------------------------------------
#[test]
fn dangling_trailing_expression_is_flushed_as_a_statement() {
    let mut program = Program::new();
    program.push(Instruction::new(opcode::LOAD_VAR).with_str("leftover").with_pos(Pos::new(1, 1)));
    let (out, _, _) = reconstruct(&program, false, false).unwrap();
    assert_eq!(out.trim(), "leftover;");
}
