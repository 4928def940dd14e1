//! The Reader
//!
//! Recursive-descent parsing of external syntax over a 64-byte ring
//! buffer that supports bounded lookahead. A probe records a backmark,
//! reads ahead, and either commits (`confirm_accept`) or backs out
//! (`rewind_to_backmark`). Reading ahead far enough that the buffer would
//! overrun the backmark is an overflow error; whitespace and comments are
//! only ever skipped outside a probe.
//!
//! Sub-parsers are tried in a fixed order (list, boolean, character,
//! quoted, string, integer, symbol) with a `Back` result meaning "not
//! mine, try the next one". A syntax error flushes the input to the next
//! blank line so the session can resume on fresh text.
//!
//! Parsed structure is assembled on the interpreter's pointer stack, so
//! every partially built list stays reachable while further allocation
//! runs.

use crate::error::SchemeError;
use crate::interp::Interp;
use skim_core::Value;
use std::io::Read;

/// Ring buffer capacity; also the lookahead bound of any single probe.
pub const RING_CAPACITY: usize = 64;

/// Longest accepted string literal.
pub const STRING_MAX: usize = 256;

/// Longest accepted symbol spelling.
pub const SYMBOL_MAX: usize = 64;

const CHAR_NAME_MAX: usize = 16;

// =============================================================================
// Ring buffer
// =============================================================================

struct RingBuffer {
    buf: [u8; RING_CAPACITY],
    /// Next byte the parser will see.
    read_pos: u64,
    /// One past the last byte pulled from the source.
    fill_pos: u64,
    /// Saved read position of the active probe.
    backmark: Option<u64>,
    eof: bool,
}

impl RingBuffer {
    fn new() -> Self {
        RingBuffer {
            buf: [0; RING_CAPACITY],
            read_pos: 0,
            fill_pos: 0,
            backmark: None,
            eof: false,
        }
    }

    fn peek(&mut self, src: &mut dyn Read) -> Result<Option<u8>, SchemeError> {
        if self.read_pos == self.fill_pos && !self.pull(src)? {
            return Ok(None);
        }
        Ok(Some(self.buf[(self.read_pos % RING_CAPACITY as u64) as usize]))
    }

    fn next(&mut self, src: &mut dyn Read) -> Result<Option<u8>, SchemeError> {
        let b = self.peek(src)?;
        if b.is_some() {
            self.read_pos += 1;
        }
        Ok(b)
    }

    /// Pull one byte from the source. Bytes behind the backmark must stay
    /// available for rewinding, which bounds how far a probe may run.
    fn pull(&mut self, src: &mut dyn Read) -> Result<bool, SchemeError> {
        if self.eof {
            return Ok(false);
        }
        let base = self.backmark.unwrap_or(self.read_pos);
        if self.fill_pos - base >= RING_CAPACITY as u64 {
            return Err(SchemeError::Overflow(
                "read-ahead overran the ring buffer".into(),
            ));
        }
        let mut byte = [0u8; 1];
        loop {
            match src.read(&mut byte) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(_) => {
                    self.buf[(self.fill_pos % RING_CAPACITY as u64) as usize] = byte[0];
                    self.fill_pos += 1;
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SchemeError::Io(e)),
            }
        }
    }

    fn start_read_ahead(&mut self) {
        debug_assert!(self.backmark.is_none(), "nested read-ahead");
        self.backmark = Some(self.read_pos);
    }

    fn confirm_accept(&mut self) {
        self.backmark = None;
    }

    fn rewind_to_backmark(&mut self) {
        if let Some(mark) = self.backmark.take() {
            self.read_pos = mark;
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Result of reading one datum.
#[derive(Debug)]
pub enum ReadOutcome {
    Datum(Value),
    Eof,
}

/// Result of one sub-parser probe.
enum Probe {
    Value(Value),
    Back,
}

pub struct Reader {
    ring: RingBuffer,
}

impl Reader {
    pub fn new() -> Self {
        Reader { ring: RingBuffer::new() }
    }

    /// Read the next datum. Syntax and overflow errors resynchronize the
    /// input past the next blank line before returning, so the caller can
    /// simply report and continue reading.
    pub fn read_one(
        &mut self,
        it: &mut Interp,
        src: &mut dyn Read,
    ) -> Result<ReadOutcome, SchemeError> {
        self.skip_atmosphere(src)?;
        if self.ring.peek(src)?.is_none() {
            return Ok(ReadOutcome::Eof);
        }
        match self.parse_datum(it, src) {
            Ok(v) => Ok(ReadOutcome::Datum(v)),
            Err(e) if matches!(e, SchemeError::Syntax(_) | SchemeError::Overflow(_)) => {
                it.stack.clear();
                self.resync(src)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn parse_datum(&mut self, it: &mut Interp, src: &mut dyn Read) -> Result<Value, SchemeError> {
        self.skip_atmosphere(src)?;
        if self.ring.peek(src)?.is_none() {
            return Err(SchemeError::Syntax("unexpected end of input".into()));
        }

        self.ring.start_read_ahead();
        match self.parse_list(it, src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        self.ring.start_read_ahead();
        match self.parse_boolean(src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        self.ring.start_read_ahead();
        match self.parse_character(src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        self.ring.start_read_ahead();
        match self.parse_quoted(it, src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        self.ring.start_read_ahead();
        match self.parse_string(it, src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        self.ring.start_read_ahead();
        match self.parse_integer(it, src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        self.ring.start_read_ahead();
        match self.parse_symbol(it, src)? {
            Probe::Value(v) => return Ok(v),
            Probe::Back => self.ring.rewind_to_backmark(),
        }
        Err(SchemeError::Syntax("unrecognized token".into()))
    }

    // =========================================================================
    // Sub-parsers
    // =========================================================================

    fn parse_list(&mut self, it: &mut Interp, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        if self.ring.peek(src)? != Some(b'(') {
            return Ok(Probe::Back);
        }
        self.ring.next(src)?;
        self.ring.confirm_accept();

        let mut count = 0usize;
        loop {
            self.skip_atmosphere(src)?;
            let Some(b) = self.ring.peek(src)? else {
                return Err(SchemeError::Syntax("unterminated list".into()));
            };
            if b == b')' {
                self.ring.next(src)?;
                it.stack.push(Value::NIL)?;
                break;
            }
            if b == b'.' {
                // A lone dot introduces the tail; anything else after the
                // dot belongs to a datum and backs out to parse_datum.
                self.ring.start_read_ahead();
                self.ring.next(src)?;
                let after = self.ring.peek(src)?;
                if is_delimiter(after) {
                    self.ring.confirm_accept();
                    if count == 0 {
                        return Err(SchemeError::Syntax("dotted pair without a head".into()));
                    }
                    let tail = self.parse_datum(it, src)?;
                    it.stack.push(tail)?;
                    self.skip_atmosphere(src)?;
                    if self.ring.next(src)? != Some(b')') {
                        return Err(SchemeError::Syntax("malformed dotted tail".into()));
                    }
                    break;
                }
                self.ring.rewind_to_backmark();
            }
            let v = self.parse_datum(it, src)?;
            it.stack.push(v)?;
            count += 1;
        }

        // Stack holds [e1 .. en, tail]; cons right to left.
        for _ in 0..count {
            it.cons_top()?;
        }
        Ok(Probe::Value(it.stack.pop()?))
    }

    fn parse_boolean(&mut self, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        if self.ring.next(src)? != Some(b'#') {
            return Ok(Probe::Back);
        }
        let truth = match self.ring.next(src)? {
            Some(b't') | Some(b'T') => true,
            Some(b'f') | Some(b'F') => false,
            _ => return Ok(Probe::Back),
        };
        if !is_delimiter(self.ring.peek(src)?) {
            return Ok(Probe::Back);
        }
        self.ring.confirm_accept();
        Ok(Probe::Value(Value::boolean(truth)))
    }

    fn parse_character(&mut self, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        if self.ring.next(src)? != Some(b'#') {
            return Ok(Probe::Back);
        }
        if self.ring.next(src)? != Some(b'\\') {
            return Ok(Probe::Back);
        }
        self.ring.confirm_accept();
        let Some(first) = self.ring.next(src)? else {
            return Err(SchemeError::Syntax("end of input in character".into()));
        };
        if !first.is_ascii_alphabetic() {
            return Ok(Probe::Value(Value::char_byte(first)));
        }
        let mut name = vec![first];
        while let Some(b) = self.ring.peek(src)? {
            if !b.is_ascii_alphabetic() {
                break;
            }
            if name.len() >= CHAR_NAME_MAX {
                return Err(SchemeError::Syntax("character name too long".into()));
            }
            name.push(b);
            self.ring.next(src)?;
        }
        let c = match name.as_slice() {
            b"space" => b' ',
            b"newline" => b'\n',
            [single] => *single,
            _ => {
                return Err(SchemeError::Syntax(format!(
                    "unknown character name #\\{}",
                    String::from_utf8_lossy(&name)
                )));
            }
        };
        Ok(Probe::Value(Value::char_byte(c)))
    }

    fn parse_quoted(&mut self, it: &mut Interp, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        if self.ring.next(src)? != Some(b'\'') {
            return Ok(Probe::Back);
        }
        self.ring.confirm_accept();
        let v = self.parse_datum(it, src)?;
        // (quote v)
        it.stack.push(v)?;
        it.stack.push(Value::NIL)?;
        it.cons_top()?;
        let tail = it.stack.pop()?;
        it.stack.push(it.syms.value_of("quote"))?;
        it.stack.push(tail)?;
        it.cons_top()?;
        Ok(Probe::Value(it.stack.pop()?))
    }

    fn parse_string(&mut self, it: &mut Interp, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        if self.ring.next(src)? != Some(b'"') {
            return Ok(Probe::Back);
        }
        self.ring.confirm_accept();
        let mut text = Vec::new();
        loop {
            let Some(b) = self.ring.next(src)? else {
                return Err(SchemeError::Syntax("unterminated string".into()));
            };
            let byte = match b {
                b'"' => break,
                b'\\' => match self.ring.next(src)? {
                    Some(b'n') => b'\n',
                    Some(other) => other,
                    None => {
                        return Err(SchemeError::Syntax("unterminated string".into()));
                    }
                },
                other => other,
            };
            if text.len() >= STRING_MAX {
                return Err(SchemeError::Syntax("string too long".into()));
            }
            text.push(byte);
        }
        Ok(Probe::Value(it.make_string(&text)?))
    }

    fn parse_integer(&mut self, it: &mut Interp, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        let mut radix: i64 = 10;
        if self.ring.peek(src)? == Some(b'#') {
            self.ring.next(src)?;
            radix = match self.ring.next(src)? {
                Some(b'd') | Some(b'D') => 10,
                Some(b'x') | Some(b'X') => 16,
                _ => return Ok(Probe::Back),
            };
        }
        let mut negative = false;
        match self.ring.peek(src)? {
            Some(b'+') => {
                self.ring.next(src)?;
            }
            Some(b'-') => {
                negative = true;
                self.ring.next(src)?;
            }
            _ => {}
        }
        let mut value: i64 = 0;
        let mut digits = 0usize;
        while let Some(b) = self.ring.peek(src)? {
            let Some(d) = digit_value(b, radix) else { break };
            self.ring.next(src)?;
            digits += 1;
            // Accumulate negatively so i64::MIN parses; check before
            // every digit so huge literals fail fast.
            value = value
                .checked_mul(radix)
                .and_then(|v| v.checked_sub(d))
                .ok_or_else(|| SchemeError::Overflow("integer too large".into()))?;
        }
        if digits == 0 {
            return Ok(Probe::Back);
        }
        if radix == 10 && self.ring.peek(src)? == Some(b'.') {
            return Err(SchemeError::Syntax(
                "floating point syntax is not supported".into(),
            ));
        }
        if !is_delimiter(self.ring.peek(src)?) {
            return Ok(Probe::Back);
        }
        self.ring.confirm_accept();
        let n = if negative {
            value
        } else {
            value
                .checked_neg()
                .ok_or_else(|| SchemeError::Overflow("integer too large".into()))?
        };
        Ok(Probe::Value(it.make_int(n)?))
    }

    fn parse_symbol(&mut self, it: &mut Interp, src: &mut dyn Read) -> Result<Probe, SchemeError> {
        let Some(first) = self.ring.peek(src)? else {
            return Ok(Probe::Back);
        };
        if !is_symbol_start(first) {
            return Ok(Probe::Back);
        }
        self.ring.next(src)?;
        self.ring.confirm_accept();
        let mut text = vec![first];
        while let Some(b) = self.ring.peek(src)? {
            if !is_symbol_continuation(b) {
                break;
            }
            if text.len() >= SYMBOL_MAX {
                return Err(SchemeError::Syntax("symbol too long".into()));
            }
            text.push(b);
            self.ring.next(src)?;
        }
        Ok(Probe::Value(it.intern_symbol(&text)?))
    }

    // =========================================================================
    // Atmosphere and recovery
    // =========================================================================

    /// Skip whitespace and `;` comments. Never runs inside a probe.
    fn skip_atmosphere(&mut self, src: &mut dyn Read) -> Result<(), SchemeError> {
        debug_assert!(self.ring.backmark.is_none(), "skip during read-ahead");
        loop {
            match self.ring.peek(src)? {
                Some(b) if b.is_ascii_whitespace() => {
                    self.ring.next(src)?;
                }
                Some(b';') => loop {
                    match self.ring.next(src)? {
                        None | Some(b'\n') => break,
                        Some(_) => {}
                    }
                },
                _ => return Ok(()),
            }
        }
    }

    /// Flush input past the next blank line (two consecutive newlines) or
    /// to end of input.
    fn resync(&mut self, src: &mut dyn Read) -> Result<(), SchemeError> {
        self.ring.confirm_accept();
        let mut newlines = 0;
        loop {
            match self.ring.next(src)? {
                None => return Ok(()),
                Some(b'\n') => {
                    newlines += 1;
                    if newlines >= 2 {
                        return Ok(());
                    }
                }
                Some(b'\r') => {}
                Some(_) => newlines = 0,
            }
        }
    }
}

impl Default for Reader {
    fn default() -> Self {
        Reader::new()
    }
}

// =============================================================================
// Character classes
// =============================================================================

fn is_delimiter(b: Option<u8>) -> bool {
    match b {
        None => true,
        Some(b) => b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'"' | b';' | b'\''),
    }
}

fn is_special(b: u8) -> bool {
    matches!(
        b,
        b'+' | b'-' | b'*' | b'/' | b'<' | b'>' | b'=' | b'!' | b'?' | b'_' | b'&' | b'$'
            | b'%' | b'~' | b'^' | b':' | b'@'
    )
}

fn is_symbol_start(b: u8) -> bool {
    b.is_ascii_alphanumeric() || is_special(b)
}

fn is_symbol_continuation(b: u8) -> bool {
    is_symbol_start(b) || b == b'.'
}

fn digit_value(b: u8, radix: i64) -> Option<i64> {
    let d = match b {
        b'0'..=b'9' => (b - b'0') as i64,
        b'a'..=b'f' => (b - b'a') as i64 + 10,
        b'A'..=b'F' => (b - b'A') as i64 + 10,
        _ => return None,
    };
    if d < radix { Some(d) } else { None }
}

// =============================================================================
// Tests
// =============================================================================
