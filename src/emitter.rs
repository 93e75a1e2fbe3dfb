//! # Positional emitter
//!
//! A forward-only byte sink tracking a `(line, col)` cursor, both 0-based.
//! The reconstructor is the only consumer: it never seeks backward, so the
//! emitter never needs to buffer or rewrite already-written bytes.
//!
//! Grounded on `ael_emit.c` (`examples/original_source/c_code/src/ael_emit.c`):
//! `emit_at`'s "can't move backward, so record why and carry on" behavior is
//! preserved byte-for-byte as a design choice, not a bug (spec §4.1, §9).

use std::io::Write;

use crate::error::EmitFailReason;

/// Forward-only emitter over any `Write` sink.
pub struct Emitter<W: Write> {
    sink: W,
    line: i32,
    col: i32,
    strict_pos: bool,
    last_req: (i32, i32),
    last_fail_reason: EmitFailReason,
}

impl<W: Write> Emitter<W> {
    pub fn new(sink: W, strict_pos: bool) -> Self {
        Self {
            sink,
            line: 0,
            col: 0,
            strict_pos,
            last_req: (0, 0),
            last_fail_reason: EmitFailReason::None,
        }
    }

    pub fn cursor(&self) -> (i32, i32) {
        (self.line, self.col)
    }

    pub fn last_fail_reason(&self) -> EmitFailReason {
        self.last_fail_reason
    }

    pub fn last_requested(&self) -> (i32, i32) {
        self.last_req
    }

    /// Write one byte, updating the line/col cursor.
    pub fn emit_char(&mut self, c: u8) -> std::io::Result<()> {
        self.sink.write_all(&[c])?;
        if c == b'\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Ok(())
    }

    pub fn emit_text(&mut self, s: &str) -> std::io::Result<()> {
        for &b in s.as_bytes() {
            self.emit_char(b)?;
        }
        Ok(())
    }

    fn emit_repeat(&mut self, c: u8, count: i32) -> std::io::Result<()> {
        for _ in 0..count {
            self.emit_char(c)?;
        }
        Ok(())
    }

    /// Attempt to move the cursor forward to `(line, col)` by emitting
    /// newlines then spaces. Never moves backward.
    ///
    /// In non-strict mode this is a no-op (only text content matters).
    /// In strict mode, a requested position behind the cursor is recorded
    /// as a failure reason but does not abort the conversion — "best
    /// effort positioning" is deliberate (spec §4.1).
    pub fn emit_at(&mut self, line: i32, col: i32) -> std::io::Result<()> {
        if !self.strict_pos {
            return Ok(());
        }
        self.last_req = (line, col);
        self.last_fail_reason = EmitFailReason::None;

        if line < self.line {
            self.last_fail_reason = EmitFailReason::BackwardLine;
            return Ok(());
        }
        if line == self.line && col < self.col {
            self.last_fail_reason = EmitFailReason::BackwardCol;
            return Ok(());
        }

        if self.line < line {
            let n = line - self.line;
            self.emit_repeat(b'\n', n)?;
        }
        if self.col < col {
            let n = col - self.col;
            self.emit_repeat(b' ', n)?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_char_tracks_line_col() {
        let mut e = Emitter::new(Vec::new(), true);
        e.emit_text("ab\ncd").unwrap();
        assert_eq!(e.cursor(), (1, 2));
    }

    #[test]
    fn emit_at_pads_forward_with_newlines_and_spaces() {
        let mut e = Emitter::new(Vec::new(), true);
        e.emit_at(2, 4).unwrap();
        assert_eq!(e.cursor(), (2, 4));
        let out = e.into_inner();
        assert_eq!(out, b"\n\n    ");
    }

    #[test]
    fn emit_at_backward_line_is_recorded_but_not_fatal() {
        let mut e = Emitter::new(Vec::new(), true);
        e.emit_at(3, 0).unwrap();
        e.emit_at(1, 0).unwrap();
        assert_eq!(e.last_fail_reason(), EmitFailReason::BackwardLine);
        assert_eq!(e.cursor(), (3, 0));
    }

    #[test]
    fn emit_at_backward_col_same_line_is_recorded() {
        let mut e = Emitter::new(Vec::new(), true);
        e.emit_at(0, 5).unwrap();
        e.emit_at(0, 2).unwrap();
        assert_eq!(e.last_fail_reason(), EmitFailReason::BackwardCol);
        assert_eq!(e.cursor(), (0, 5));
    }

    #[test]
    fn non_strict_mode_emit_at_is_a_no_op() {
        let mut e = Emitter::new(Vec::new(), false);
        e.emit_at(5, 5).unwrap();
        assert_eq!(e.cursor(), (0, 0));
    }

    #[test]
    fn monotonicity_across_a_sequence_of_steps() {
        let mut e = Emitter::new(Vec::new(), true);
        let mut prev = e.cursor();
        for (l, c) in [(0, 3), (0, 5), (1, 0), (1, 2), (4, 1)] {
            e.emit_at(l, c).unwrap();
            let cur = e.cursor();
            assert!(cur.0 > prev.0 || (cur.0 == prev.0 && cur.1 >= prev.1));
            prev = cur;
        }
    }
}
