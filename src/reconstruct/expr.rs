//! # Expression tree
//!
//! Rebuilt on the reconstructor's working stack as load/binary/unary/call
//! ops are scanned (spec §3.3, §4.5.4).

use crate::error::Pos;
use crate::ir::subop;
use crate::units;

pub const LVALUE_DUP: u8 = 1 << 0;
pub const ADDR_OF: u8 = 1 << 1;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Real(f64),
    Imag(f64),
    Str(Vec<u8>),
    Bool(bool),
    Null,
    Var(String),
    List(Vec<Expr>),
    BinOp(i32, Box<Expr>, Box<Expr>),
    UnOp(i32, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Vec<Expr>),
    IncDec(Box<Expr>, bool, bool),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `name op= rhs` (spec §4.4.1 level 0 minus plain `=`); `op` is the
    /// base arithmetic subop (`ADD`, `SUB`, …), never `ASSIGN` itself.
    CompoundAssign(String, i32, Box<Expr>),
    /// Internal sentinel: a pending argument-count marker that never
    /// escapes reconstruction (spec §3.3).
    CallArgs(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub op_pos: Pos,
    pub lparen_pos: Pos,
    pub close_pos: Pos,
    pub flags: u8,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            op_pos: Pos::NONE,
            lparen_pos: Pos::NONE,
            close_pos: Pos::NONE,
            flags: 0,
        }
    }

    pub fn with_pos(mut self, pos: Pos) -> Self {
        self.op_pos = pos;
        self
    }

    pub fn is_lvalue_dup(&self) -> bool {
        self.flags & LVALUE_DUP != 0
    }

    pub fn is_addr_of(&self) -> bool {
        self.flags & ADDR_OF != 0
    }
}

/// Mark (or clear) the `ADDR_OF` flag on variable loads that lack a real
/// source position (spec §3.3) — a position-less `LOAD_VAR` is one the
/// producer synthesized for a call/index argument, condition, or return
/// expression rather than one that came from an actual `&name` in source.
/// `allow` tracks whether the current position in the tree is one where a
/// synthesized var load is legal to render as `&name`; recurses with
/// per-subexpression `allow` values matching the original's treatment of
/// assignment targets, call/index bases, and increment/decrement operands
/// (which are never eligible, since they need a plain lvalue).
pub fn mark_addr_of(e: &mut Expr, allow: bool) {
    match &mut e.kind {
        ExprKind::Var(_) => {
            if allow && e.op_pos.is_none() {
                e.flags |= ADDR_OF;
            } else {
                e.flags &= !ADDR_OF;
            }
        }
        ExprKind::List(items) => {
            for item in items {
                mark_addr_of(item, allow);
            }
        }
        ExprKind::Call(callee, args) => {
            mark_addr_of(callee, false);
            for arg in args {
                mark_addr_of(arg, true);
            }
        }
        ExprKind::Index(base, indices) => {
            mark_addr_of(base, false);
            for idx in indices {
                mark_addr_of(idx, true);
            }
        }
        ExprKind::IncDec(operand, ..) => {
            mark_addr_of(operand, false);
        }
        ExprKind::UnOp(_, rhs) => {
            mark_addr_of(rhs, allow);
        }
        ExprKind::BinOp(sub, lhs, rhs) => {
            if *sub == subop::ASSIGN {
                mark_addr_of(lhs, false);
                mark_addr_of(rhs, allow);
            } else {
                mark_addr_of(lhs, allow);
                mark_addr_of(rhs, allow);
            }
        }
        ExprKind::Ternary(cond, then_e, else_e) => {
            mark_addr_of(cond, allow);
            mark_addr_of(then_e, allow);
            mark_addr_of(else_e, allow);
        }
        _ => {}
    }
}

/// Precedence used for parenthesization (spec §4.5.4).
pub fn precedence(sub: i32) -> u8 {
    match sub {
        subop::ASSIGN | subop::COMMA => 0,
        x if x == subop::LOGICAL_OR => 1,
        x if x == subop::LOGICAL_AND => 2,
        subop::BIT_OR => 3,
        subop::BIT_XOR => 4,
        subop::BIT_AND => 5,
        subop::EQ | subop::NE => 6,
        subop::GE | subop::LE | subop::GT | subop::LT => 7,
        subop::SHL | subop::SHR => 8,
        subop::ADD | subop::SUB => 9,
        subop::MUL | subop::MOD | subop::DIV => 10,
        subop::NOT => 11,
        subop::NEGATE => 11,
        subop::POW => 12,
        _ => 13,
    }
}

/// Fixed operator-to-text mapping (spec §4.5.4).
pub fn operator_text(sub: i32) -> &'static str {
    match sub {
        10 => "+",
        11 => "-",
        12 => "*",
        13 => "%",
        14 => "/",
        43 => "**",
        4 => "==",
        5 => "!=",
        6 => ">=",
        7 => "<=",
        8 => ">",
        9 => "<",
        18 => "&&",
        19 => "||",
        25 => "&",
        26 => "^",
        27 => "|",
        29 => "<<",
        30 => ">>",
        x if x == subop::NOT => "!",
        15 => "-",
        16 => "=",
        47 => ",",
        _ => "?",
    }
}

/// Render an expression to AEL source text. Parenthesizes defensively
/// (spec §4.5.4) given the caller's context precedence and whether the
/// expression sits on the right side of a commutative/right-assoc parent.
pub fn render(e: &Expr, parent_prec: i8, force_right_parens: bool) -> String {
    let text = render_inner(e);
    let my_prec = match &e.kind {
        ExprKind::BinOp(sub, ..) => precedence(*sub) as i8,
        ExprKind::UnOp(sub, _) => precedence(*sub) as i8,
        _ => 13,
    };
    let needs_parens = my_prec < parent_prec || (force_right_parens && my_prec == parent_prec);
    if needs_parens {
        format!("({text})")
    } else {
        text
    }
}

fn render_inner(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Int(v) => v.to_string(),
        ExprKind::Real(v) => format_real(*v),
        ExprKind::Imag(v) => format!("{}i", format_real(*v)),
        ExprKind::Str(bytes) => format!("\"{}\"", String::from_utf8_lossy(bytes)),
        ExprKind::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        ExprKind::Null => "null".to_string(),
        ExprKind::Var(name) => {
            if e.is_addr_of() {
                format!("&{name}")
            } else {
                name.clone()
            }
        }
        ExprKind::List(items) => {
            let inner = items
                .iter()
                .map(|i| render(i, 1, false))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {inner} }}")
        }
        ExprKind::BinOp(sub, lhs, rhs) => {
            // unit-recovery: `lit * unit_multiplier` prints back as `lit unit`
            if *sub == subop::MUL {
                if let (ExprKind::Int(_) | ExprKind::Real(_), ExprKind::Real(c)) = (&lhs.kind, &rhs.kind) {
                    if let Some(name) = units::name_for_multiplier(*c) {
                        return format!("{} {}", render_inner(lhs), name);
                    }
                }
            }
            let prec = precedence(*sub) as i8;
            // Right-associative operators (`=`, `**`) group the same way
            // without parens on the right at equal precedence, but need
            // them on the left; everything else is the reverse.
            let right_assoc = *sub == subop::ASSIGN || *sub == subop::POW;
            let (lhs_prec, rhs_prec) = if right_assoc { (prec + 1, prec) } else { (prec, prec + 1) };
            let lhs_txt = render(lhs, lhs_prec, false);
            let rhs_txt = render(rhs, rhs_prec, false);
            format!("{} {} {}", lhs_txt, operator_text(*sub), rhs_txt)
        }
        ExprKind::UnOp(sub, rhs) => {
            let prec = precedence(*sub) as i8;
            format!("{}{}", operator_text(*sub), render(rhs, prec, false))
        }
        ExprKind::Call(callee, args) => {
            let inner = args
                .iter()
                .map(|a| render(a, 1, false))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({})", render_inner(callee), inner)
        }
        ExprKind::Index(base, indices) => {
            let mut out = render_inner(base);
            for idx in indices {
                out.push('[');
                out.push_str(&render(idx, 0, false));
                out.push(']');
            }
            out
        }
        ExprKind::IncDec(operand, is_prefix, is_inc) => {
            let op_txt = if *is_inc { "++" } else { "--" };
            if *is_prefix {
                format!("{op_txt}{}", render_inner(operand))
            } else {
                format!("{}{op_txt}", render_inner(operand))
            }
        }
        ExprKind::Ternary(cond, then_e, else_e) => {
            format!(
                "{} ? {} : {}",
                render(cond, 2, false),
                render(then_e, 1, false),
                render(else_e, 1, false)
            )
        }
        ExprKind::CompoundAssign(name, sub, rhs) => {
            format!("{name} {}= {}", operator_text(*sub), render(rhs, 1, false))
        }
        ExprKind::CallArgs(_) => String::new(),
    }
}

/// Shortest `%g`/`%e`-style representation that round-trips through
/// `f64::from_str` (spec §4.5.4), always carrying a decimal point or
/// exponent so it never re-lexes as an integer.
pub fn format_real(v: f64) -> String {
    if v == 0.0 {
        return "0.0".to_string();
    }
    for prec in 1..=17 {
        let g = format!("{v:.*e}", prec - 1);
        if let Ok(parsed) = g.parse::<f64>() {
            if parsed == v {
                return normalize_real_text(&fixed_or_exp(v, prec));
            }
        }
    }
    format!("{v:e}")
}

fn fixed_or_exp(v: f64, sig_digits: usize) -> String {
    let exp_form = format!("{v:.*e}", sig_digits.saturating_sub(1));
    let abs = v.abs();
    if (1e-4..1e15).contains(&abs) || abs == 0.0 {
        let decimals = sig_digits.saturating_sub(1).min(17);
        let fixed = format!("{v:.decimals$}");
        if fixed.parse::<f64>().map(|p| p == v).unwrap_or(false) {
            return fixed;
        }
    }
    exp_form
}

fn normalize_real_text(s: &str) -> String {
    let mut s = s.to_string();
    if let Some(epos) = s.find(['e', 'E']) {
        let (mantissa, exp) = s.split_at(epos);
        let exp = &exp[1..];
        let (sign, digits) = if let Some(stripped) = exp.strip_prefix('-') {
            ("-", stripped)
        } else if let Some(stripped) = exp.strip_prefix('+') {
            ("", stripped)
        } else {
            ("", exp)
        };
        let digits = digits.trim_start_matches('0');
        let digits = if digits.is_empty() { "0" } else { digits };
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        s = format!("{mantissa}e{sign}{digits}");
    } else if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_round_trips_through_parse() {
        for v in [0.5, 1.0, 123.456, 1e-6, 25.4e-6, 1e20] {
            let text = format_real(v);
            let parsed: f64 = text.parse().unwrap();
            assert_eq!(parsed, v, "text = {text}");
        }
    }

    #[test]
    fn integer_valued_real_still_has_decimal_point() {
        assert!(format_real(5.0).contains('.'));
    }

    #[test]
    fn unit_recovery_prints_unit_suffix() {
        let lit = Expr::new(ExprKind::Int(5));
        let mult = Expr::new(ExprKind::Real(1e-6));
        let bin = Expr::new(ExprKind::BinOp(subop::MUL, Box::new(lit), Box::new(mult)));
        assert_eq!(render(&bin, 0, false), "5 um");
    }
}
