//! # IR model
//!
//! In-memory representation of one instruction record and one instruction
//! program (sequence). The opcode catalog (spec §6.2) and the operator
//! alphabet nested under `OP_OP` (spec §4.5.4) live here as named
//! constants so the rest of the crate never hard-codes a magic number.

pub mod codec;

use crate::error::Pos;

/// Primary opcodes (`OP=` value). Grounded on spec §6.2 and
/// `examples/original_source/c_code/include/ir_opcodes.h`.
pub mod opcode {
    pub const STMT_END: i32 = 0;
    pub const LOAD_INT: i32 = 3;
    pub const LOAD_STR: i32 = 4;
    pub const LOAD_BOOL: i32 = 5;
    pub const LOAD_TRUE: i32 = 7;
    pub const LOAD_REAL: i32 = 8;
    pub const LOAD_IMAG: i32 = 9;
    pub const LOAD_NULL: i32 = 10;
    pub const LOAD_VAR: i32 = 16;
    pub const ADD_LOCAL: i32 = 20;
    pub const BEGIN_FUNCT: i32 = 32;
    pub const DEFINE_FUNCT: i32 = 33;
    pub const BRANCH_TRUE: i32 = 34;
    pub const BEGIN_LOOP: i32 = 36;
    pub const END_LOOP: i32 = 37;
    pub const LOOP_AGAIN: i32 = 38;
    pub const LOOP_EXIT: i32 = 39;
    pub const ADD_CASE: i32 = 40;
    pub const BRANCH_TABLE: i32 = 41;
    pub const SET_LABEL: i32 = 42;
    pub const ADD_LABEL: i32 = 43;
    pub const ADD_GLOBAL: i32 = 44;
    pub const ADD_ARG: i32 = 45;
    pub const OP: i32 = 48;
    pub const NUM_LOCAL: i32 = 52;
    pub const SET_LOOP_DEFAULT: i32 = 53;
    pub const DROP_LOCAL: i32 = 55;
}

/// Sub-opcodes of `OP_OP` (expression operator alphabet, spec §4.5.4).
pub mod subop {
    pub const EQ: i32 = 4;
    pub const NE: i32 = 5;
    pub const GE: i32 = 6;
    pub const LE: i32 = 7;
    pub const GT: i32 = 8;
    pub const LT: i32 = 9;
    pub const ADD: i32 = 10;
    pub const SUB: i32 = 11;
    pub const MUL: i32 = 12;
    pub const MOD: i32 = 13;
    pub const DIV: i32 = 14;
    pub const NEGATE: i32 = 15;
    pub const ASSIGN: i32 = 16;
    pub const EXPR_STMT: i32 = 17;
    /// The reference's `SUBOP=3` is overloaded between logical `!` and the
    /// `COND_TEST` marker inserted after every `if`/`while`/ternary header
    /// condition (spec §4.5.3, §9). Both are produced and consumed only by
    /// this crate, so `!` gets a distinct value here — see DESIGN.md.
    pub const NOT: i32 = 37;
    pub const LOGICAL_AND: i32 = 18;
    pub const LOGICAL_OR: i32 = 19;
    pub const RETURN: i32 = 20;
    pub const BIT_AND: i32 = 25;
    pub const BIT_XOR: i32 = 26;
    pub const BIT_OR: i32 = 27;
    pub const SHL: i32 = 29;
    pub const SHR: i32 = 30;
    pub const POW: i32 = 43;
    pub const CALL_OR_MOD: i32 = 48;
    pub const COMMA: i32 = 47;
    pub const PUSH_ARGS: i32 = 56;
    /// `identifier (+= -= *= /= %=) expr` and `(++|--)identifier`,
    /// `identifier(++|--)` markers (spec §4.4.1, original_source
    /// `ael_parser_new.c` `parse_unary_expr`/assignment-statement path).
    pub const PRE_INCREMENT: i32 = 31;
    pub const PRE_DECREMENT: i32 = 32;
    pub const POST_INCREMENT: i32 = 33;
    pub const POST_DECREMENT: i32 = 34;
    /// Marks the preceding `LOAD_VAR` as a compound-assignment target
    /// rather than a plain value load.
    pub const LVALUE_MARK: i32 = 36;
    /// Cond-test marker that precedes `BRANCH_TRUE` in `if`/loop headers.
    pub const COND_TEST: i32 = 3;
    /// Ternary start/then-end/else-end markers (spec §4.4.4, §4.5.3).
    pub const TERNARY_START: i32 = 59;
    pub const TERNARY_THEN_END: i32 = 60;
    pub const TERNARY_ELSE_END: i32 = 65;
    pub const TERNARY_THEN_START: i32 = 61;
    /// Nested-list-literal "enter" marker (spec §4.4.7 S4).
    pub const LIST_ENTER: i32 = 53;
    pub const BUILD_LIST: i32 = 46;
    /// Array/list indexing `base[i, ...]`. The original compiler overloads
    /// `SUBOP_CALL` (48) for this, disambiguated only by fragile context
    /// (spec §9 open question). Since both ends of this IR are owned by
    /// this crate, indexing gets its own subop instead — see DESIGN.md.
    pub const INDEX: i32 = 49;
}

/// One IR instruction record (spec §3.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: i32,
    pub arg1: Option<i32>,
    pub arg2: Option<i32>,
    pub arg3: Option<i32>,
    pub arg4: Option<i32>,
    pub str: Option<Vec<u8>>,
    pub num: Option<f64>,
    pub depth: Option<i32>,
}

impl Instruction {
    pub fn new(op: i32) -> Self {
        Self {
            op,
            arg1: None,
            arg2: None,
            arg3: None,
            arg4: None,
            str: None,
            num: None,
            depth: None,
        }
    }

    pub fn with_arg1(mut self, v: i32) -> Self {
        self.arg1 = Some(v);
        self
    }

    pub fn with_pos(mut self, pos: Pos) -> Self {
        self.arg2 = Some(pos.line);
        self.arg3 = Some(pos.col);
        self
    }

    pub fn with_arg4(mut self, v: i32) -> Self {
        self.arg4 = Some(v);
        self
    }

    pub fn with_str(mut self, s: impl Into<Vec<u8>>) -> Self {
        self.str = Some(s.into());
        self
    }

    pub fn with_num(mut self, v: f64) -> Self {
        self.num = Some(v);
        self
    }

    pub fn with_depth(mut self, d: i32) -> Self {
        self.depth = Some(d);
        self
    }

    /// The `(arg2, arg3)` pair as a `Pos`, unwrapping the signed-16-bit
    /// wraparound quirk documented in spec §3.1: hooked reference logs may
    /// wrap `arg2` into `i16` range, so a small negative value is really a
    /// large positive line number.
    pub fn pos(&self) -> Pos {
        let line = self.arg2.map(unwrap_i16_wrap).unwrap_or(-1);
        let col = self.arg3.unwrap_or(-1);
        Pos::new(line, col)
    }
}

/// Recover a positive line number from the signed-16-bit wraparound a
/// hooked IR log may apply (spec §3.1 invariant).
pub fn unwrap_i16_wrap(v: i32) -> i32 {
    if (-32768..0).contains(&v) {
        v + 65536
    } else {
        v
    }
}

/// An ordered sequence of instructions (spec §3.2). Indexed random access
/// and bounded forward scans are first-class operations here rather than
/// re-derived ad hoc at every call site in the reconstructor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub source_path: Option<String>,
    insts: Vec<Instruction>,
}

/// Default bound on template-matcher lookahead (spec §3.2, §5, §9).
pub const TEMPLATE_SCAN_WINDOW: usize = 512;

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, inst: Instruction) {
        self.insts.push(inst);
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Instruction> {
        self.insts.get(i)
    }

    /// Attach a depth annotation to an already-pushed instruction — used
    /// by the IR text codec's stateful "trailing `# DEPTH=<n>` line
    /// attaches to the preceding instruction" rule (spec §4.2).
    pub fn set_inst_depth(&mut self, i: usize, depth: i32) {
        if let Some(inst) = self.insts.get_mut(i) {
            inst.depth = Some(depth);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.insts.iter()
    }

    /// A bounded forward window starting at `from`, at most
    /// `TEMPLATE_SCAN_WINDOW` instructions long, as (index, instruction)
    /// pairs. Template matchers never look further than this; programs
    /// never mutate through this view (spec §5).
    pub fn window_from(&self, from: usize) -> impl Iterator<Item = (usize, &Instruction)> {
        let end = (from + TEMPLATE_SCAN_WINDOW).min(self.insts.len());
        self.insts[from..end]
            .iter()
            .enumerate()
            .map(move |(k, inst)| (from + k, inst))
    }

    /// Skip indices whose instruction is scope bookkeeping (`NUM_LOCAL` /
    /// `DROP_LOCAL`), returning the first non-bookkeeping index at or after
    /// `from`. Template matchers must tolerate these interleavings (spec
    /// §4.5.3, §9) — centralizing the skip avoids re-deriving it at every
    /// matcher.
    pub fn skip_scope_bookkeeping(&self, mut from: usize) -> usize {
        while let Some(inst) = self.insts.get(from) {
            if inst.op == opcode::NUM_LOCAL || inst.op == opcode::DROP_LOCAL {
                from += 1;
            } else {
                break;
            }
        }
        from
    }
}

impl std::ops::Index<usize> for Program {
    type Output = Instruction;
    fn index(&self, i: usize) -> &Instruction {
        &self.insts[i]
    }
}
