//! # Parser / IR generator
//!
//! Recursive-descent with operator-precedence climbing for expressions
//! (spec §4.4). Emits IR instructions directly into an in-memory
//! [`crate::ir::Program`] — there is no intermediate AST on the front end.

#[cfg(test)]
mod tests;

use crate::error::{AelError, Pos};
use crate::ir::{opcode, subop, Instruction, Program};
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::{Lexer, LexerPositionCache};
use crate::units;

/// Parse a complete AEL source file into an IR program.
pub fn parse(source: &str) -> Result<Program, AelError> {
    let (lexer, lex_errors) = Lexer::new(source);
    if let Some(err) = lex_errors.into_iter().next() {
        return Err(AelError::IrParse {
            line: (err.pos.line + 1).max(0) as usize,
            message: err.message,
        });
    }
    let mut parser = Parser::new(lexer);
    parser.parse_program()
}

/// Continue/break targets for the loop or switch currently being parsed
/// (spec §3.4 loop-stack; threaded here so `break`/`continue` can resolve
/// to the enclosing construct's actual labels instead of allocating their
/// own unreachable ones).
struct LoopLabels {
    continue_target: i32,
    break_target: i32,
    is_switch: bool,
}

struct Parser {
    lexer: Lexer,
    cache: LexerPositionCache,
    program: Program,
    next_label: i32,
    depth: i32,
    /// depth at which a list literal was last opened, used by the
    /// nested-list depth-marker quirk (spec §4.4.7).
    list_marker_emitted_at_depth: Vec<bool>,
    loop_ctx_stack: Vec<LoopLabels>,
    /// Set by the `a = {};` empty-list quirk (spec §4.4.7): the position
    /// of the literal's closing `}`, which overrides the enclosing
    /// function's `DEFINE_FUNCT` end position instead of the real `}`
    /// token that closes the function body.
    pending_empty_list_override: Option<Pos>,
}

impl Parser {
    fn new(lexer: Lexer) -> Self {
        let mut cache = LexerPositionCache::default();
        cache.update(&lexer);
        Self {
            lexer,
            cache,
            program: Program::new(),
            next_label: 0,
            depth: 0,
            list_marker_emitted_at_depth: Vec::new(),
            loop_ctx_stack: Vec::new(),
            pending_empty_list_override: None,
        }
    }

    fn peek(&self) -> &Token {
        self.lexer.peek_token()
    }

    fn advance(&mut self) -> Token {
        let tok = self.lexer.next_token();
        self.cache.record_consumed(tok.pos);
        self.cache.update(&self.lexer);
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, AelError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let pos = self.peek().pos;
            Err(AelError::IrParse {
                line: (pos.line + 1).max(0) as usize,
                message: format!("expected {what}, found {:?}", self.peek().kind),
            })
        }
    }

    fn fresh_label(&mut self) -> i32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    fn push(&mut self, inst: Instruction) {
        self.program.push(inst);
    }

    fn parse_program(&mut self) -> Result<Program, AelError> {
        while !matches!(self.peek().kind, TokenKind::Eof) {
            self.parse_top_level_item()?;
        }
        Ok(std::mem::take(&mut self.program))
    }

    fn parse_top_level_item(&mut self) -> Result<(), AelError> {
        if matches!(self.peek().kind, TokenKind::Defun) {
            self.parse_function()
        } else {
            self.parse_statement()
        }
    }

    // ---- functions -----------------------------------------------------

    fn parse_function(&mut self) -> Result<(), AelError> {
        let hdr_pos = self.peek().pos;
        self.advance(); // defun
        let name_tok = self.expect(&TokenKind::Ident(String::new()), "function name")?;
        let name = ident_text(&name_tok);

        self.push(
            Instruction::new(opcode::BEGIN_FUNCT)
                .with_arg1(hdr_pos.line)
                .with_str(name.into_bytes()),
        );

        self.expect(&TokenKind::LParen, "'('")?;
        if !self.check(&TokenKind::RParen) {
            loop {
                let p = self.expect(&TokenKind::Ident(String::new()), "parameter name")?;
                self.push(Instruction::new(opcode::ADD_ARG).with_str(ident_text(&p).into_bytes()));
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        self.expect(&TokenKind::LBrace, "'{'")?;
        self.depth += 1;
        self.push(Instruction::new(opcode::NUM_LOCAL).with_depth(self.depth));
        let mut local_count = 0i32;
        while !self.check(&TokenKind::RBrace) {
            if matches!(self.peek().kind, TokenKind::Decl) {
                local_count += self.parse_decl()?;
            } else {
                self.parse_statement()?;
            }
        }
        let end_tok = self.advance(); // '}'
        self.push(Instruction::new(opcode::NUM_LOCAL).with_depth(self.depth - 1));
        if local_count > 0 {
            self.push(Instruction::new(opcode::DROP_LOCAL).with_arg1(local_count));
        }
        self.depth -= 1;

        self.push(Instruction::new(opcode::LOAD_NULL));
        self.push(
            Instruction::new(opcode::OP)
                .with_arg1(subop::RETURN)
                .with_pos(end_tok.pos),
        );
        let epilogue_pos = self.pending_empty_list_override.take().unwrap_or(end_tok.pos);
        self.push(Instruction::new(opcode::DEFINE_FUNCT).with_pos(epilogue_pos));
        Ok(())
    }

    // ---- statements ------------------------------------------------------

    fn parse_statement(&mut self) -> Result<(), AelError> {
        match &self.peek().kind {
            TokenKind::Decl => {
                self.parse_decl()?;
                Ok(())
            }
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Break => self.parse_break(),
            TokenKind::Continue => self.parse_continue(),
            TokenKind::Return => self.parse_return(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_block(&mut self) -> Result<(), AelError> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.depth += 1;
        self.push(Instruction::new(opcode::NUM_LOCAL).with_depth(self.depth));
        let mut local_count = 0i32;
        while !self.check(&TokenKind::RBrace) {
            if matches!(self.peek().kind, TokenKind::Decl) {
                local_count += self.parse_decl()?;
            } else {
                self.parse_statement()?;
            }
        }
        self.advance(); // '}'
        self.push(Instruction::new(opcode::NUM_LOCAL).with_depth(self.depth - 1));
        if local_count > 0 {
            self.push(Instruction::new(opcode::DROP_LOCAL).with_arg1(local_count));
        }
        self.depth -= 1;
        Ok(())
    }

    /// Returns the number of locals declared, for the enclosing block's
    /// `DROP_LOCAL` count (globals never contribute).
    fn parse_decl(&mut self) -> Result<i32, AelError> {
        self.advance(); // decl
        let is_local = self.depth > 0;
        let mut names = Vec::new();
        loop {
            let tok = self.expect(&TokenKind::Ident(String::new()), "identifier")?;
            names.push(ident_text(&tok));
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        for name in &names {
            let op = if is_local {
                opcode::ADD_LOCAL
            } else {
                opcode::ADD_GLOBAL
            };
            self.push(Instruction::new(op).with_str(name.clone().into_bytes()));
        }

        let mut count = names.len() as i32;
        if self.check(&TokenKind::Assign) {
            // `decl a = <expr>;` inline-initializer form.
            self.advance();
            let name = names.last().cloned().unwrap_or_default();
            let var_pos = self.peek().pos;
            self.push(
                Instruction::new(opcode::LOAD_VAR)
                    .with_str(name.into_bytes())
                    .with_pos(var_pos),
            );
            let assign_pos = self.parse_expr(0)?;
            self.push(
                Instruction::new(opcode::OP)
                    .with_arg1(subop::ASSIGN)
                    .with_pos(assign_pos),
            );
            let end_tok = self.expect(&TokenKind::Semicolon, "';'")?;
            self.push(Instruction::new(opcode::STMT_END).with_pos(end_tok.pos));
        } else {
            self.expect(&TokenKind::Semicolon, "';'")?;
        }
        if !is_local {
            count = 0;
        }
        Ok(count)
    }

    fn parse_expr_statement(&mut self) -> Result<(), AelError> {
        if self.looks_like_empty_list_assign() {
            let name_tok = self.advance(); // identifier
            self.advance(); // '='
            self.advance(); // '{'
            let close_tok = self.advance(); // '}'
            self.advance(); // ';'
            self.push(
                Instruction::new(opcode::LOAD_VAR)
                    .with_str(ident_text(&name_tok).into_bytes())
                    .with_pos(name_tok.pos),
            );
            self.push(
                Instruction::new(opcode::OP)
                    .with_arg1(subop::BUILD_LIST)
                    .with_arg4(0)
                    .with_pos(close_tok.pos),
            );
            self.pending_empty_list_override = Some(close_tok.pos);
            return Ok(());
        }

        self.parse_expr(0)?;
        let end_tok = self.expect(&TokenKind::Semicolon, "';'")?;
        self.push(Instruction::new(opcode::STMT_END).with_pos(end_tok.pos));
        Ok(())
    }

    /// `ident = {};` (spec §4.4.7): the parser suppresses `ASSIGN`/
    /// `STMT_END` entirely for this exact pattern and instead overrides
    /// the enclosing function's epilogue position.
    fn looks_like_empty_list_assign(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Ident(_))
            && matches!(self.lexer.peek_at(1).kind, TokenKind::Assign)
            && matches!(self.lexer.peek_at(2).kind, TokenKind::LBrace)
            && matches!(self.lexer.peek_at(3).kind, TokenKind::RBrace)
            && matches!(self.lexer.peek_at(4).kind, TokenKind::Semicolon)
    }

    fn parse_return(&mut self) -> Result<(), AelError> {
        let kw_pos = self.peek().pos;
        self.advance();
        if self.check(&TokenKind::Semicolon) {
            self.push(Instruction::new(opcode::LOAD_NULL));
        } else {
            self.parse_expr(0)?;
        }
        let end_tok = self.expect(&TokenKind::Semicolon, "';'")?;
        self.push(
            Instruction::new(opcode::OP)
                .with_arg1(subop::RETURN)
                .with_pos(kw_pos),
        );
        self.push(Instruction::new(opcode::STMT_END).with_pos(end_tok.pos));
        Ok(())
    }

    fn parse_break(&mut self) -> Result<(), AelError> {
        let pos = self.peek().pos;
        self.advance();
        self.expect(&TokenKind::Semicolon, "';'")?;
        let target = self
            .loop_ctx_stack
            .last()
            .map(|l| l.break_target)
            .ok_or_else(|| AelError::IrParse {
                line: (pos.line + 1).max(0) as usize,
                message: "'break' outside a loop or switch".to_string(),
            })?;
        self.push(Instruction::new(opcode::LOAD_TRUE));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(target));
        Ok(())
    }

    fn parse_continue(&mut self) -> Result<(), AelError> {
        let pos = self.peek().pos;
        self.advance();
        self.expect(&TokenKind::Semicolon, "';'")?;
        let target = self
            .loop_ctx_stack
            .iter()
            .rev()
            .find(|l| !l.is_switch)
            .map(|l| l.continue_target)
            .ok_or_else(|| AelError::IrParse {
                line: (pos.line + 1).max(0) as usize,
                message: "'continue' outside a loop".to_string(),
            })?;
        self.push(Instruction::new(opcode::LOAD_TRUE));
        self.push(Instruction::new(opcode::LOOP_AGAIN));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(target));
        Ok(())
    }

    // ---- control flow ------------------------------------------------

    fn parse_if(&mut self) -> Result<(), AelError> {
        self.advance(); // if
        self.expect(&TokenKind::LParen, "'('")?;
        let cond_pos = self.peek().pos;
        self.push(Instruction::new(opcode::OP).with_arg1(subop::TERNARY_START).with_pos(cond_pos));
        let else_label = self.fresh_label();
        self.push(Instruction::new(opcode::ADD_LABEL));
        self.parse_expr(0)?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.push(Instruction::new(opcode::OP).with_arg1(subop::COND_TEST).with_pos(cond_pos));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(else_label).with_pos(cond_pos));

        self.parse_statement()?;

        if matches!(self.peek().kind, TokenKind::Else) {
            let end_label = self.fresh_label();
            self.push(Instruction::new(opcode::LOAD_TRUE));
            self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(end_label));
            self.push(Instruction::new(opcode::SET_LABEL).with_arg1(else_label));
            self.advance(); // else
            self.parse_statement()?;
            self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        } else {
            self.push(Instruction::new(opcode::SET_LABEL).with_arg1(else_label));
        }
        Ok(())
    }

    fn parse_while(&mut self) -> Result<(), AelError> {
        self.advance(); // while
        let cond_label = self.fresh_label();
        let end_label = self.fresh_label();
        self.push(Instruction::new(opcode::BEGIN_LOOP).with_arg1(crate::reconstruct::LOOP_KIND_WHILE));
        self.push(Instruction::new(opcode::LOOP_AGAIN));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(cond_label));
        self.expect(&TokenKind::LParen, "'('")?;
        self.parse_expr(0)?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.push(Instruction::new(opcode::OP).with_arg1(subop::COND_TEST));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(end_label));

        self.loop_ctx_stack.push(LoopLabels {
            continue_target: cond_label,
            break_target: end_label,
            is_switch: false,
        });
        self.parse_statement()?;
        self.loop_ctx_stack.pop();

        self.push(Instruction::new(opcode::LOAD_TRUE));
        self.push(Instruction::new(opcode::LOOP_AGAIN));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(cond_label));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        self.push(Instruction::new(opcode::END_LOOP));
        Ok(())
    }

    fn parse_do_while(&mut self) -> Result<(), AelError> {
        self.advance(); // do
        let start_label = self.fresh_label();
        let test_label = self.fresh_label();
        let end_label = self.fresh_label();
        self.push(Instruction::new(opcode::BEGIN_LOOP).with_arg1(crate::reconstruct::LOOP_KIND_DO_WHILE));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(start_label));

        self.loop_ctx_stack.push(LoopLabels {
            continue_target: test_label,
            break_target: end_label,
            is_switch: false,
        });
        self.parse_statement()?;
        self.loop_ctx_stack.pop();

        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(test_label));
        let while_pos = self.peek().pos;
        self.expect(&TokenKind::While, "'while'")?;
        self.expect(&TokenKind::LParen, "'('")?;
        self.parse_expr(0)?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::Semicolon, "';'")?;

        self.push(Instruction::new(opcode::OP).with_arg1(subop::COND_TEST).with_pos(while_pos));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(start_label).with_pos(while_pos));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        self.push(Instruction::new(opcode::END_LOOP));
        Ok(())
    }

    fn parse_for(&mut self) -> Result<(), AelError> {
        self.advance(); // for
        self.expect(&TokenKind::LParen, "'('")?;

        let start_label = self.fresh_label();
        let cond_label = self.fresh_label();
        let incr_label = self.fresh_label();
        let end_label = self.fresh_label();

        self.push(Instruction::new(opcode::BEGIN_LOOP).with_arg1(crate::reconstruct::LOOP_KIND_FOR));
        if !self.check(&TokenKind::Semicolon) {
            self.parse_expr(0)?;
            let end_tok = self.expect(&TokenKind::Semicolon, "';'")?;
            self.push(Instruction::new(opcode::STMT_END).with_pos(end_tok.pos));
        } else {
            self.advance();
        }

        self.push(Instruction::new(opcode::LOOP_AGAIN));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(cond_label));
        if !self.check(&TokenKind::Semicolon) {
            self.parse_expr(0)?;
        } else {
            self.push(Instruction::new(opcode::LOAD_TRUE));
        }
        self.expect(&TokenKind::Semicolon, "';'")?;
        self.push(Instruction::new(opcode::OP).with_arg1(subop::COND_TEST));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(end_label));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(incr_label));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(start_label));

        if !self.check(&TokenKind::RParen) {
            self.parse_expr(0)?;
        }
        self.expect(&TokenKind::RParen, "')'")?;

        self.loop_ctx_stack.push(LoopLabels {
            continue_target: incr_label,
            break_target: end_label,
            is_switch: false,
        });
        self.parse_statement()?;
        self.loop_ctx_stack.pop();

        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(incr_label));
        self.push(Instruction::new(opcode::LOAD_TRUE));
        self.push(Instruction::new(opcode::LOOP_AGAIN));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(cond_label));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        self.push(Instruction::new(opcode::END_LOOP));
        Ok(())
    }

    fn parse_switch(&mut self) -> Result<(), AelError> {
        self.advance(); // switch
        self.expect(&TokenKind::LParen, "'('")?;
        self.parse_expr(0)?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::LBrace, "'{'")?;

        let table_label = self.fresh_label();
        let end_label = self.fresh_label();
        self.push(Instruction::new(opcode::BEGIN_LOOP).with_arg1(crate::reconstruct::LOOP_KIND_SWITCH));

        self.loop_ctx_stack.push(LoopLabels {
            continue_target: 0,
            break_target: end_label,
            is_switch: true,
        });
        while !self.check(&TokenKind::RBrace) {
            match &self.peek().kind {
                TokenKind::Case => {
                    self.advance();
                    let lit = self.expect(&TokenKind::Int(0), "case value")?;
                    let value = match lit.kind {
                        TokenKind::Int(v) => v as i32,
                        _ => 0,
                    };
                    self.expect(&TokenKind::Colon, "':'")?;
                    let case_label = self.fresh_label();
                    self.push(Instruction::new(opcode::ADD_CASE).with_arg1(value));
                    self.push(Instruction::new(opcode::SET_LABEL).with_arg1(case_label));
                }
                TokenKind::Default => {
                    self.advance();
                    self.expect(&TokenKind::Colon, "':'")?;
                    self.push(Instruction::new(opcode::SET_LOOP_DEFAULT));
                }
                _ => self.parse_statement()?,
            }
        }
        self.loop_ctx_stack.pop();
        self.advance(); // '}'

        self.push(Instruction::new(opcode::LOAD_TRUE));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(end_label));
        self.push(Instruction::new(opcode::LOOP_AGAIN));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(table_label));
        self.push(Instruction::new(opcode::BRANCH_TABLE));
        self.push(Instruction::new(opcode::LOOP_EXIT));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        self.push(Instruction::new(opcode::END_LOOP));
        Ok(())
    }

    // ---- expressions -----------------------------------------------------

    /// Pratt-style precedence climb (spec §4.4.1). Returns the position
    /// attached to the top-level operator actually emitted, for callers
    /// that need to anchor a following instruction to it.
    fn parse_expr(&mut self, min_prec: u8) -> Result<Pos, AelError> {
        let (mut lhs_pos, mut lhs_name) = self.parse_unary()?;
        loop {
            if let Some(base_sub) = compound_assign_sub(&self.peek().kind) {
                if min_prec > 0 {
                    break;
                }
                let name = lhs_name.clone().ok_or_else(|| AelError::IrParse {
                    line: (self.peek().pos.line + 1).max(0) as usize,
                    message: "compound assignment target must be a plain variable".to_string(),
                })?;
                let op_tok = self.advance();
                let op_pos = op_tok.pos;
                self.push(Instruction::new(opcode::OP).with_arg1(subop::LVALUE_MARK).with_pos(op_pos));
                self.push(Instruction::new(opcode::OP).with_arg1(subop::EXPR_STMT).with_pos(op_pos));
                self.parse_expr(0)?;
                self.push(Instruction::new(opcode::OP).with_arg1(base_sub).with_pos(op_pos));
                self.push(Instruction::new(opcode::OP).with_arg1(subop::ASSIGN).with_pos(op_pos));
                lhs_pos = op_pos;
                lhs_name = Some(name);
                continue;
            }

            let info = match binop_info(&self.peek().kind) {
                Some(info) => info,
                None => break,
            };
            let (op_prec, assoc_right, sub, is_ternary) = info;
            if op_prec < min_prec {
                break;
            }

            if is_ternary {
                lhs_pos = self.parse_ternary_tail()?;
                lhs_name = None;
                continue;
            }

            if matches!(self.peek().kind, TokenKind::AndAnd | TokenKind::OrOr) {
                let op_tok = self.advance();
                lhs_pos = self.parse_short_circuit_tail(op_tok.kind, op_tok.pos, op_prec)?;
                lhs_name = None;
                continue;
            }

            let op_tok = self.advance();
            let op_pos = op_tok.pos;
            let next_min = if assoc_right { op_prec } else { op_prec + 1 };
            self.parse_expr(next_min)?;
            self.push(Instruction::new(opcode::OP).with_arg1(sub).with_pos(op_pos));
            lhs_pos = op_pos;
            lhs_name = None;
        }
        Ok(lhs_pos)
    }

    fn parse_ternary_tail(&mut self) -> Result<Pos, AelError> {
        let start_pos = self.peek().pos;
        self.push(Instruction::new(opcode::OP).with_arg1(subop::TERNARY_START).with_pos(start_pos));
        let false_label = self.fresh_label();
        let end_label = self.fresh_label();
        self.push(Instruction::new(opcode::ADD_LABEL));
        self.push(Instruction::new(opcode::ADD_LABEL));
        self.push(Instruction::new(opcode::OP).with_arg1(subop::COND_TEST).with_pos(start_pos));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(false_label).with_pos(start_pos));

        self.advance(); // '?'
        self.push(
            Instruction::new(opcode::OP)
                .with_arg1(subop::TERNARY_THEN_START)
                .with_pos(start_pos),
        );
        self.parse_expr(1)?; // level 1 = ternary precedence, right-assoc
        self.push(
            Instruction::new(opcode::OP)
                .with_arg1(subop::TERNARY_THEN_END)
                .with_pos(start_pos),
        );
        self.push(Instruction::new(opcode::LOAD_TRUE));
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(end_label));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(false_label));

        self.expect(&TokenKind::Colon, "':'")?;
        self.parse_expr(1)?;
        self.push(
            Instruction::new(opcode::OP)
                .with_arg1(subop::TERNARY_ELSE_END)
                .with_pos(start_pos),
        );
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        Ok(start_pos)
    }

    /// Short-circuit chains share one end label across the whole chain
    /// (spec §4.4.3): fold consecutive operators of the same kind in here
    /// rather than letting `parse_expr`'s outer loop re-enter, so a single
    /// `SET_LABEL` closes the entire chain.
    fn parse_short_circuit_tail(
        &mut self,
        kind: TokenKind,
        first_op_pos: Pos,
        prec: u8,
    ) -> Result<Pos, AelError> {
        let sub = if matches!(kind, TokenKind::AndAnd) {
            subop::LOGICAL_AND
        } else {
            subop::LOGICAL_OR
        };
        let marker = if matches!(kind, TokenKind::AndAnd) { 62 } else { 63 };

        self.push(Instruction::new(opcode::ADD_LABEL));
        self.push(Instruction::new(opcode::OP).with_arg1(marker).with_pos(first_op_pos));
        self.push(Instruction::new(opcode::BEGIN_LOOP));
        if matches!(kind, TokenKind::AndAnd) {
            self.push(Instruction::new(opcode::OP).with_arg1(subop::COND_TEST).with_pos(first_op_pos));
        }
        let end_label = self.fresh_label();
        self.push(Instruction::new(opcode::BRANCH_TRUE).with_arg1(end_label).with_pos(first_op_pos));
        self.push(Instruction::new(opcode::STMT_END));
        self.push(Instruction::new(opcode::OP).with_arg1(marker).with_pos(first_op_pos));

        let next_min = prec + 1;
        let mut anchor = first_op_pos;
        self.parse_expr(next_min)?;

        while matches!(
            (&kind, &self.peek().kind),
            (TokenKind::AndAnd, TokenKind::AndAnd) | (TokenKind::OrOr, TokenKind::OrOr)
        ) {
            let op_tok = self.advance();
            anchor = op_tok.pos;
            self.push(Instruction::new(opcode::OP).with_arg1(marker).with_pos(anchor));
            self.parse_expr(next_min)?;
        }

        self.push(Instruction::new(opcode::OP).with_arg1(marker).with_pos(anchor));
        self.push(Instruction::new(opcode::SET_LABEL).with_arg1(end_label));
        self.push(Instruction::new(opcode::OP).with_arg1(sub).with_pos(anchor));
        Ok(anchor)
    }

    /// Returns the expression's anchor position and, when the whole unary
    /// expression turned out to be a bare variable reference with no
    /// prefix/postfix operator applied, that variable's name — needed so
    /// a following compound-assignment operator can identify its target
    /// (spec §4.4.1, `original_source` `ael_parser_new.c`).
    fn parse_unary(&mut self) -> Result<(Pos, Option<String>), AelError> {
        let tok_pos = self.peek().pos;
        match &self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                self.parse_unary()?;
                self.push(Instruction::new(opcode::OP).with_arg1(subop::NEGATE).with_pos(tok_pos));
                Ok((tok_pos, None))
            }
            TokenKind::Not => {
                self.advance();
                self.parse_unary()?;
                self.push(Instruction::new(opcode::OP).with_arg1(subop::NOT).with_pos(tok_pos));
                Ok((tok_pos, None))
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let is_inc = matches!(self.peek().kind, TokenKind::PlusPlus);
                self.advance();
                let name_tok = self.expect(&TokenKind::Ident(String::new()), "identifier")?;
                self.push(
                    Instruction::new(opcode::LOAD_VAR)
                        .with_str(ident_text(&name_tok).into_bytes())
                        .with_pos(name_tok.pos),
                );
                let sub = if is_inc { subop::PRE_INCREMENT } else { subop::PRE_DECREMENT };
                self.push(Instruction::new(opcode::OP).with_arg1(sub).with_pos(tok_pos));
                Ok((tok_pos, None))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<(Pos, Option<String>), AelError> {
        let (mut pos, mut name) = self.parse_primary()?;
        loop {
            match &self.peek().kind {
                TokenKind::LParen => {
                    let lparen_pos = self.peek().pos;
                    self.advance();
                    let mut argc = 0i32;
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            if self.check(&TokenKind::Comma) {
                                // trailing/elided arg: implicit null (spec §4.4.7)
                                self.push(Instruction::new(opcode::LOAD_NULL));
                            } else {
                                self.parse_expr(1)?;
                            }
                            argc += 1;
                            if self.check(&TokenKind::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "')'")?;
                    self.push(
                        Instruction::new(opcode::OP)
                            .with_arg1(subop::CALL_OR_MOD)
                            .with_pos(lparen_pos)
                            .with_arg4(argc),
                    );
                    pos = lparen_pos;
                    name = None;
                }
                TokenKind::LBracket => {
                    let base_pos = pos;
                    self.advance();
                    let mut count = 0i32;
                    self.parse_expr(1)?;
                    count += 1;
                    while self.check(&TokenKind::Comma) {
                        self.advance();
                        self.parse_expr(1)?;
                        count += 1;
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    self.push(
                        Instruction::new(opcode::OP)
                            .with_arg1(subop::INDEX)
                            .with_pos(base_pos)
                            .with_arg4(count + 1),
                    );
                    name = None;
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let is_inc = matches!(self.peek().kind, TokenKind::PlusPlus);
                    let p = self.peek().pos;
                    self.advance();
                    let sub = if is_inc { subop::POST_INCREMENT } else { subop::POST_DECREMENT };
                    self.push(Instruction::new(opcode::OP).with_arg1(sub).with_pos(p));
                    pos = p;
                    name = None;
                }
                _ => break,
            }
        }
        Ok((pos, name))
    }

    fn parse_primary(&mut self) -> Result<(Pos, Option<String>), AelError> {
        let tok = self.advance();
        let pos = tok.pos;
        let mut name = None;
        match tok.kind {
            TokenKind::Int(v) => {
                self.push(Instruction::new(opcode::LOAD_INT).with_arg1(v as i32).with_pos(pos));
                self.maybe_unit_multiply(pos)?;
            }
            TokenKind::Real(v) => {
                self.push(Instruction::new(opcode::LOAD_REAL).with_num(v).with_pos(pos));
                self.maybe_unit_multiply(pos)?;
            }
            TokenKind::Imag(v) => {
                self.push(Instruction::new(opcode::LOAD_IMAG).with_num(v).with_pos(pos));
            }
            TokenKind::Str(bytes) => {
                self.push(Instruction::new(opcode::LOAD_STR).with_str(bytes).with_pos(pos));
            }
            TokenKind::True => self.push(Instruction::new(opcode::LOAD_BOOL).with_arg1(1).with_pos(pos)),
            TokenKind::False => self.push(Instruction::new(opcode::LOAD_BOOL).with_arg1(0).with_pos(pos)),
            TokenKind::Null => self.push(Instruction::new(opcode::LOAD_NULL).with_pos(pos)),
            TokenKind::Ident(ident_name) => {
                self.push(Instruction::new(opcode::LOAD_VAR).with_str(ident_name.clone().into_bytes()).with_pos(pos));
                let had_unit = self.maybe_unit_multiply(pos)?;
                if !had_unit {
                    name = Some(ident_name);
                }
            }
            TokenKind::LParen => {
                self.parse_expr(0)?;
                self.expect(&TokenKind::RParen, "')'")?;
            }
            TokenKind::LBrace => {
                self.parse_list_literal(pos)?;
            }
            other => {
                return Err(AelError::IrParse {
                    line: (pos.line + 1).max(0) as usize,
                    message: format!("unexpected token in expression: {other:?}"),
                })
            }
        }
        Ok((pos, name))
    }

    /// Implicit unit multiplication: a literal or variable immediately
    /// followed by an identifier matching the unit table becomes a
    /// multiplication by that unit's multiplier (spec §4.4.2). Any other
    /// trailing identifier is left alone — it belongs to the next token.
    fn maybe_unit_multiply(&mut self, pos: Pos) -> Result<bool, AelError> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            if let Some(mult) = units::multiplier(name) {
                let unit_tok = self.advance();
                self.push(Instruction::new(opcode::LOAD_REAL).with_num(mult).with_pos(unit_tok.pos));
                self.push(Instruction::new(opcode::OP).with_arg1(subop::MUL).with_pos(pos));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn parse_list_literal(&mut self, open_pos: Pos) -> Result<(), AelError> {
        if self.check(&TokenKind::RBrace) {
            self.advance();
            self.push(Instruction::new(opcode::OP).with_arg1(subop::BUILD_LIST).with_arg4(0).with_pos(open_pos));
            return Ok(());
        }

        let depth_idx = self.depth.max(0) as usize;
        while self.list_marker_emitted_at_depth.len() <= depth_idx {
            self.list_marker_emitted_at_depth.push(false);
        }
        if self.depth >= 2 {
            let markers = if !self.list_marker_emitted_at_depth[depth_idx] {
                self.depth
            } else {
                1
            };
            for _ in 0..markers {
                self.push(Instruction::new(opcode::OP).with_arg1(subop::LIST_ENTER).with_pos(open_pos));
            }
            self.list_marker_emitted_at_depth[depth_idx] = true;
        }

        self.depth += 1;
        let mut count = 0i32;
        loop {
            self.parse_expr(1)?;
            count += 1;
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.depth -= 1;
        if self.list_marker_emitted_at_depth.len() > depth_idx + 1 {
            self.list_marker_emitted_at_depth.truncate(depth_idx + 1);
        }

        let close = self.expect(&TokenKind::RBrace, "'}'")?;
        self.push(
            Instruction::new(opcode::OP)
                .with_arg1(subop::BUILD_LIST)
                .with_arg4(count)
                .with_pos(close.pos),
        );
        Ok(())
    }
}

fn ident_text(tok: &Token) -> String {
    match &tok.kind {
        TokenKind::Ident(s) => s.clone(),
        _ => tok.lexeme.clone(),
    }
}

/// Base arithmetic subop for a compound-assignment token, or `None` for
/// any other token (spec §4.4.1 level 0, minus plain `=`).
fn compound_assign_sub(kind: &TokenKind) -> Option<i32> {
    Some(match kind {
        TokenKind::PlusAssign => subop::ADD,
        TokenKind::MinusAssign => subop::SUB,
        TokenKind::StarAssign => subop::MUL,
        TokenKind::SlashAssign => subop::DIV,
        TokenKind::PercentAssign => subop::MOD,
        _ => return None,
    })
}

/// `(precedence, right_assoc, subop, is_ternary)` for a binary operator
/// token, per the table in spec §4.4.1. `is_ternary` marks `?`, which has
/// no direct subop and is handled specially by `parse_ternary_tail`.
fn binop_info(kind: &TokenKind) -> Option<(u8, bool, i32, bool)> {
    use TokenKind::*;
    Some(match kind {
        Assign => (0, true, subop::ASSIGN, false),
        Question => (1, true, 0, true),
        OrOr => (2, false, subop::LOGICAL_OR, false),
        AndAnd => (3, false, subop::LOGICAL_AND, false),
        Pipe => (4, false, subop::BIT_OR, false),
        Caret => (5, false, subop::BIT_XOR, false),
        Amp => (6, false, subop::BIT_AND, false),
        EqEq => (7, false, subop::EQ, false),
        NotEq => (7, false, subop::NE, false),
        Lt => (8, false, subop::LT, false),
        Gt => (8, false, subop::GT, false),
        LtEq => (8, false, subop::LE, false),
        GtEq => (8, false, subop::GE, false),
        Shl => (9, false, subop::SHL, false),
        Shr => (9, false, subop::SHR, false),
        Plus => (10, false, subop::ADD, false),
        Minus => (10, false, subop::SUB, false),
        Star => (11, false, subop::MUL, false),
        Slash => (11, false, subop::DIV, false),
        Percent => (11, false, subop::MOD, false),
        StarStar => (12, true, subop::POW, false),
        _ => return None,
    })
}
