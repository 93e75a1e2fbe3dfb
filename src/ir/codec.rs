//! # IR text codec
//!
//! Reads and writes the line-oriented textual IR format (spec §6.1).
//! Grounded on `examples/original_source/c_code/src/ir_text_parser.c`
//! (reader) and `src/output.c` (writer) for the details spec.md leaves
//! to "matches a reference compiler": quote-closing rule, the `arg2`
//! 16-bit unwrap, and the trailing-comment depth annotation.

use crate::error::AelError;
use crate::ir::{opcode, Instruction, Program};

/// Cosmetic mnemonic + internal "builder function" hint printed in the
/// trailing comment of each serialized instruction (spec §4.2, §9
/// "builder_function_hint"). Purely descriptive — the reader ignores it.
fn opcode_mnemonic(op: i32) -> &'static str {
    use opcode::*;
    match op {
        STMT_END => "STMT_END",
        LOAD_INT => "LOAD_INT",
        LOAD_STR => "LOAD_STR",
        LOAD_BOOL => "LOAD_BOOL",
        LOAD_TRUE => "LOAD_TRUE",
        LOAD_REAL => "LOAD_REAL",
        LOAD_IMAG => "LOAD_IMAG",
        LOAD_NULL => "LOAD_NULL",
        LOAD_VAR => "LOAD_VAR",
        ADD_LOCAL => "ADD_LOCAL",
        BEGIN_FUNCT => "BEGIN_FUNCT",
        DEFINE_FUNCT => "DEFINE_FUNCT",
        BRANCH_TRUE => "BRANCH_TRUE",
        BEGIN_LOOP => "BEGIN_LOOP",
        END_LOOP => "END_LOOP",
        LOOP_AGAIN => "LOOP_AGAIN",
        LOOP_EXIT => "LOOP_EXIT",
        ADD_CASE => "ADD_CASE",
        BRANCH_TABLE => "BRANCH_TABLE",
        SET_LABEL => "SET_LABEL",
        ADD_LABEL => "ADD_LABEL",
        ADD_GLOBAL => "ADD_GLOBAL",
        ADD_ARG => "ADD_ARG",
        OP => "OP",
        NUM_LOCAL => "NUM_LOCAL",
        SET_LOOP_DEFAULT => "SET_LOOP_DEFAULT",
        DROP_LOCAL => "DROP_LOCAL",
        _ => "UNKNOWN",
    }
}

fn builder_hint(op: i32) -> Option<&'static str> {
    use opcode::*;
    Some(match op {
        NUM_LOCAL => "acomp_num_local",
        ADD_LOCAL => "acomp_add_local",
        ADD_GLOBAL => "acomp_add_global",
        DROP_LOCAL => "acomp_drop_local",
        LOAD_VAR => "acomp_word_ref",
        LOAD_STR => "acomp_string",
        LOAD_INT => "acomp_integer",
        LOAD_REAL => "acomp_real",
        LOAD_IMAG => "acomp_imag",
        LOAD_NULL => "acomp_null",
        BEGIN_FUNCT => "acomp_begin_funct",
        DEFINE_FUNCT => "acomp_define_funct",
        BRANCH_TRUE => "acomp_branch_true",
        SET_LABEL => "acomp_set_label",
        ADD_LABEL => "acomp_add_label",
        BEGIN_LOOP => "acomp_begin_loop",
        END_LOOP => "acomp_end_loop",
        LOOP_AGAIN => "acomp_loop_again",
        LOOP_EXIT => "acomp_loop_exit",
        ADD_CASE => "acomp_add_case",
        BRANCH_TABLE => "acomp_branch_table",
        SET_LOOP_DEFAULT => "acomp_set_loop_default",
        OP => "acomp_op",
        _ => return None,
    })
}

/// Serialize a program to the IR text format (spec §6.1, §4.2, §9).
///
/// `generated_at` is an already-formatted timestamp string supplied by the
/// caller (the driver) — this function never reads the system clock, so
/// serialization stays a pure function of its input (spec §9).
pub fn write_program(
    program: &Program,
    out: &mut impl std::io::Write,
    generated_at: Option<&str>,
) -> std::io::Result<()> {
    writeln!(out, "# AEL IR Log")?;
    if let Some(path) = &program.source_path {
        writeln!(out, "# Source: {path}")?;
    }
    if let Some(ts) = generated_at {
        writeln!(out, "# Generated: {ts}")?;
    }
    writeln!(out, "# Method: recursive-descent compiler")?;
    writeln!(out, "#")?;
    writeln!(out)?;

    for (i, inst) in program.iter().enumerate() {
        write!(out, "[{:04X}] OP={:3}  ", i, inst.op)?;

        if let Some(s) = &inst.str {
            write!(out, "str=\"{}\"  ", escape_for_ir(s))?;
        }

        let has_numeric = inst.arg1.is_some() || inst.arg2.is_some() || inst.arg3.is_some();
        if has_numeric {
            write!(
                out,
                "arg1={:5}  arg2={:5}  arg3={:5}  ",
                inst.arg1.unwrap_or(0),
                inst.arg2.unwrap_or(0),
                inst.arg3.unwrap_or(0)
            )?;
        }
        if let Some(a4) = inst.arg4 {
            if a4 != 0 {
                write!(out, "a4={a4}  ")?;
            }
        }

        write!(out, "# {}", opcode_mnemonic(inst.op))?;
        if let Some(num) = inst.num {
            let tag = if inst.op == opcode::LOAD_REAL {
                "LOAD_REAL"
            } else {
                "LOAD_IMAG"
            };
            write!(out, " {tag} val={num}")?;
        }
        if let Some(hint) = builder_hint(inst.op) {
            write!(out, " ({hint})")?;
        }
        writeln!(out)?;

        if let Some(depth) = inst.depth {
            writeln!(out, "    # DEPTH={depth}")?;
        }
    }

    writeln!(out, "\n# End of IR log (Total: {} instructions)", program.len())?;
    Ok(())
}

/// Parse an IR text document (spec §6.1).
///
/// Errors out with the offending line number on a malformed instruction
/// (spec §7 item 2); unrecognized lines that are not headers, comments,
/// depth annotations, or instructions are simply ignored, matching the
/// reference reader's liberal-whitespace grammar.
pub fn parse_program(text: &str) -> Result<Program, AelError> {
    let mut program = Program::new();
    let mut last_inst_index: Option<usize> = None;

    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("# Source:") {
            if program.source_path.is_none() && line_no <= 50 {
                program.source_path = Some(rest.trim().to_string());
            }
            continue;
        }

        if let Some(depth_str) = trimmed.strip_prefix("# DEPTH=") {
            let depth: i32 = depth_str
                .trim()
                .parse()
                .map_err(|_| AelError::IrParse {
                    line: line_no,
                    message: format!("malformed DEPTH annotation: {trimmed}"),
                })?;
            if let Some(idx) = last_inst_index {
                let insts_len = program.len();
                if idx < insts_len {
                    // Program has no public mutable indexer by design (forward
                    // construction only); route through a dedicated setter.
                    program.set_inst_depth(idx, depth);
                }
            }
            continue;
        }

        if trimmed.starts_with('#') {
            continue;
        }

        if !trimmed.starts_with('[') {
            continue;
        }

        let inst = parse_ir_line(trimmed, line_no)?;
        program.push(inst);
        last_inst_index = Some(program.len() - 1);
    }

    Ok(program)
}

fn parse_ir_line(line: &str, line_no: usize) -> Result<Instruction, AelError> {
    let mut s = line;
    // '[' <hex4> ']' prefix — a human-readable sequence number, discarded.
    if let Some(close) = s.find(']') {
        s = &s[close + 1..];
    } else {
        return Err(AelError::IrParse {
            line: line_no,
            message: "missing ']' in instruction address prefix".into(),
        });
    }
    s = s.trim_start();

    if !s.starts_with("OP=") {
        return Err(AelError::IrParse {
            line: line_no,
            message: "expected OP= field".into(),
        });
    }

    let mut inst = Instruction::new(0);
    let mut consumed_op = false;

    // Strip a trailing `#`-comment (builder hint / numeric payload tag)
    // before tokenizing fields, but remember it to recover LOAD_REAL/
    // LOAD_IMAG payloads (spec §4.2, §6.1).
    let (field_part, comment_part) = split_once_unquoted_hash(s);

    let mut rest = field_part;
    while !rest.trim_start().is_empty() {
        rest = rest.trim_start();
        if let Some(v) = rest.strip_prefix("OP=") {
            let (num, tail) = take_int(v).ok_or_else(|| malformed(line_no, "OP"))?;
            inst.op = num;
            consumed_op = true;
            rest = tail;
        } else if let Some(v) = rest.strip_prefix("arg1=") {
            let (num, tail) = take_int(v).ok_or_else(|| malformed(line_no, "arg1"))?;
            inst.arg1 = Some(num);
            rest = tail;
        } else if let Some(v) = rest.strip_prefix("arg2=") {
            let (num, tail) = take_int(v).ok_or_else(|| malformed(line_no, "arg2"))?;
            inst.arg2 = Some(num);
            rest = tail;
        } else if let Some(v) = rest.strip_prefix("arg3=") {
            let (num, tail) = take_int(v).ok_or_else(|| malformed(line_no, "arg3"))?;
            inst.arg3 = Some(num);
            rest = tail;
        } else if let Some(v) = rest.strip_prefix("a4=") {
            let (num, tail) = take_int(v).ok_or_else(|| malformed(line_no, "a4"))?;
            inst.arg4 = Some(num);
            rest = tail;
        } else if let Some(v) = rest.strip_prefix("str=") {
            let (bytes, tail) = take_quoted_string(v).ok_or_else(|| malformed(line_no, "str"))?;
            inst.str = Some(bytes);
            rest = tail;
        } else {
            // Unknown token: skip to next whitespace.
            let skip = rest.find(char::is_whitespace).unwrap_or(rest.len());
            rest = &rest[skip..];
        }
    }

    if !consumed_op {
        return Err(AelError::IrParse {
            line: line_no,
            message: "missing required OP field".into(),
        });
    }

    if let Some(comment) = comment_part {
        if let Some(num) = extract_numeric_payload(comment) {
            inst.num = Some(num);
        }
    }

    // Unwrap the signed-16-bit wraparound some hooked logs apply to arg2.
    if let Some(v) = inst.arg2 {
        if (-32768..0).contains(&v) {
            inst.arg2 = Some(v + 65536);
        }
    }

    Ok(inst)
}

fn malformed(line_no: usize, field: &str) -> AelError {
    AelError::IrParse {
        line: line_no,
        message: format!("malformed field `{field}`"),
    }
}

fn take_int(s: &str) -> Option<(i32, &str)> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
        i += 1;
    }
    let start_digits = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == start_digits {
        return None;
    }
    let num: i32 = s[..i].parse().ok()?;
    Some((num, &s[i..]))
}

/// Extract a quoted string field. Bytes inside are stored verbatim; the
/// closing `"` is the first one preceded by an even run of backslashes
/// (spec §6.1, grounded on `ir_text_parser.c:parse_quoted_string`).
fn take_quoted_string(s: &str) -> Option<(Vec<u8>, &str)> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut i = 1;
    let mut backslash_run = 0usize;
    let mut out = Vec::new();
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' && backslash_run % 2 == 0 {
            i += 1;
            return Some((out, &s[i..]));
        }
        if c == b'\\' {
            backslash_run += 1;
        } else {
            backslash_run = 0;
        }
        out.push(c);
        i += 1;
    }
    None
}

/// Split a line's fields from its trailing `#`-comment, respecting quoted
/// strings (a `#` inside `str="..."` is not a comment marker).
fn split_once_unquoted_hash(s: &str) -> (&str, Option<&str>) {
    let bytes = s.as_bytes();
    let mut in_quotes = false;
    let mut backslash_run = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' if backslash_run % 2 == 0 => in_quotes = !in_quotes,
            b'\\' => backslash_run += 1,
            _ => {}
        }
        if b != b'\\' {
            backslash_run = 0;
        }
        if b == b'#' && !in_quotes {
            return (&s[..i], Some(&s[i + 1..]));
        }
    }
    (s, None)
}

/// Pull a `LOAD_REAL val=<double>` / `LOAD_IMAG val=<double>` payload out
/// of a trailing comment (spec §4.2, §6.1).
fn extract_numeric_payload(comment: &str) -> Option<f64> {
    let idx = comment.find("val=")?;
    let rest = &comment[idx + 4..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    rest[..end].trim().parse().ok()
}

fn escape_for_ir(bytes: &[u8]) -> String {
    // The codec writes bytes verbatim, matching the reader's no-unescape
    // contract (spec §6.1) — only `"` must never be allowed to
    // prematurely terminate the field, so any unescaped quote already in
    // the stored bytes is backslash-escaped on the way out.
    let mut out = String::with_capacity(bytes.len());
    let mut backslash_run = 0usize;
    for &b in bytes {
        if b == b'"' && backslash_run % 2 == 0 {
            out.push('\\');
        }
        if b == b'\\' {
            backslash_run += 1;
        } else {
            backslash_run = 0;
        }
        out.push(b as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_simple_program() {
        let mut p = Program::new();
        p.source_path = Some("foo.ael".into());
        p.push(
            Instruction::new(opcode::LOAD_INT)
                .with_arg1(42)
                .with_depth(1),
        );
        p.push(Instruction::new(opcode::LOAD_VAR).with_str("x"));

        let mut buf = Vec::new();
        write_program(&p, &mut buf, None).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let reparsed = parse_program(&text).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed.get(0).unwrap().arg1, Some(42));
        assert_eq!(reparsed.get(0).unwrap().depth, Some(1));
        assert_eq!(reparsed.get(1).unwrap().str.as_deref(), Some(b"x".as_slice()));
        assert_eq!(reparsed.source_path.as_deref(), Some("foo.ael"));
    }

    #[test]
    fn quoted_string_preserves_escaped_quote_bytes() {
        let line = r#"[0000] OP=4  str="he said \"hi\""  # LOAD_STR"#;
        let inst = parse_ir_line(line, 1).unwrap();
        assert_eq!(inst.str.as_deref(), Some(br#"he said \"hi\""#.as_slice()));
    }

    #[test]
    fn arg2_signed_16_bit_wrap_is_unwrapped() {
        let line = "[0000] OP=0  arg1=0  arg2=-32700  arg3=4  # STMT_END";
        let inst = parse_ir_line(line, 1).unwrap();
        assert_eq!(inst.arg2, Some(-32700 + 65536));
    }

    #[test]
    fn load_real_payload_round_trips_through_comment() {
        let mut p = Program::new();
        p.push(Instruction::new(opcode::LOAD_REAL).with_num(3.5));
        let mut buf = Vec::new();
        write_program(&p, &mut buf, None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("LOAD_REAL val=3.5"));
        let reparsed = parse_program(&text).unwrap();
        assert_eq!(reparsed.get(0).unwrap().num, Some(3.5));
    }

    #[test]
    fn depth_annotation_attaches_to_preceding_instruction() {
        let text = "[0000] OP=52  # NUM_LOCAL\n    # DEPTH=2\n[0001] OP=0  # STMT_END\n";
        let p = parse_program(text).unwrap();
        assert_eq!(p.get(0).unwrap().depth, Some(2));
        assert_eq!(p.get(1).unwrap().depth, None);
    }

    #[test]
    fn malformed_instruction_reports_offending_line() {
        let text = "[0000] OP=  # bad\n";
        let err = parse_program(text).unwrap_err();
        match err {
            AelError::IrParse { line, .. } => assert_eq!(line, 1),
            other => panic!("expected IrParse, got {other:?}"),
        }
    }
}
