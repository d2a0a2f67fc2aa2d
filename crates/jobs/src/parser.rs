//! The job-file tokenizer.
//!
//! Commands are uppercase keywords, one per line:
//!
//! ```text
//! WRITE [(k,v)(k2,v2)]
//! READ [k,k2]
//! DELETE [k,k2]
//! SHOW
//! WAIT <delay_ms>
//! BACKUP
//! HELP
//! # comment to end of line
//! ```
//!
//! Keys and values must not contain spaces and must fit in
//! MAX_STRING_SIZE bytes including their delimiter; a batch must close
//! its `]` before reaching MAX_WRITE_SIZE entries. A malformed command
//! consumes input through the next newline and surfaces as one
//! `ParseError`, leaving the reader positioned at the next line.

use shelf_core::limits::{MAX_STRING_SIZE, MAX_WRITE_SIZE};
use shelf_core::Command;
use std::io::Read;
use thiserror::Error;

/// Tokenizer errors.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Unrecognized or malformed command line
    #[error("invalid command, see HELP for usage")]
    InvalidCommand,

    /// The underlying reader failed
    #[error("I/O error reading job: {0}")]
    Io(#[from] std::io::Error),
}

/// Streaming tokenizer over a job file.
///
/// Iterate it to get one `Result<Command, ParseError>` per command;
/// blank lines and comments are skipped silently.
pub struct CommandReader<R> {
    input: R,
}

impl<R: Read> CommandReader<R> {
    /// Wrap a reader. Hand in something buffered; the tokenizer reads a
    /// byte at a time.
    pub fn new(input: R) -> Self {
        CommandReader { input }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, ParseError> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consume input through the next newline (or EOF).
    fn skip_line(&mut self) -> Result<(), ParseError> {
        while let Some(byte) = self.next_byte()? {
            if byte == b'\n' {
                break;
            }
        }
        Ok(())
    }

    fn invalid<T>(&mut self) -> Result<T, ParseError> {
        self.skip_line()?;
        Err(ParseError::InvalidCommand)
    }

    /// Read exactly `keyword.len()` bytes and require them to match.
    fn expect_keyword(&mut self, keyword: &[u8]) -> Result<bool, ParseError> {
        for &expected in keyword {
            match self.next_byte()? {
                Some(byte) if byte == expected => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// A bare command must be followed by a newline or EOF.
    fn expect_line_end(&mut self) -> Result<bool, ParseError> {
        match self.next_byte()? {
            None | Some(b'\n') => Ok(true),
            Some(_) => Ok(false),
        }
    }

    /// Read a string up to one of the delimiters `,` `)` `]`, rejecting
    /// spaces and strings that fill the whole buffer without a
    /// delimiter. Returns the string and the delimiter that ended it.
    ///
    /// Bytes accumulate raw so the size bound counts input bytes, and
    /// the string is validated as UTF-8 only once its delimiter is
    /// seen; content that does not decode is rejected, never
    /// transcoded.
    fn read_string(&mut self) -> Result<Option<(String, u8)>, ParseError> {
        let mut bytes = Vec::new();
        while bytes.len() < MAX_STRING_SIZE {
            let byte = match self.next_byte()? {
                Some(b) => b,
                None => return Ok(None),
            };
            match byte {
                b' ' => return Ok(None),
                b',' | b')' | b']' => {
                    return Ok(String::from_utf8(bytes).ok().map(|string| (string, byte)))
                }
                other => bytes.push(other),
            }
        }
        // Hit the size bound before a delimiter.
        Ok(None)
    }

    /// Parse `[(k,v)(k2,v2)...]` after `WRITE `.
    fn parse_write(&mut self) -> Result<Command, ParseError> {
        if self.next_byte()? != Some(b'[') {
            return self.invalid();
        }
        if self.next_byte()? != Some(b'(') {
            return self.invalid();
        }

        let mut pairs = Vec::new();
        while pairs.len() < MAX_WRITE_SIZE {
            let key = match self.read_string()? {
                Some((key, b',')) => key,
                _ => return self.invalid(),
            };
            let value = match self.read_string()? {
                Some((value, b')')) => value,
                _ => return self.invalid(),
            };
            pairs.push((key, value));

            match self.next_byte()? {
                Some(b'(') => continue,
                Some(b']') => break,
                _ => return self.invalid(),
            }
        }

        // A batch still at MAX_WRITE_SIZE entries here never closed its
        // ']' in time and is rejected as a whole.
        if pairs.len() == MAX_WRITE_SIZE {
            return self.invalid();
        }
        if !self.expect_line_end()? {
            return self.invalid();
        }
        Ok(Command::Write(pairs))
    }

    /// Parse `[k,k2,...]` after `READ ` or `DELETE `.
    fn parse_key_list(&mut self, delete: bool) -> Result<Command, ParseError> {
        if self.next_byte()? != Some(b'[') {
            return self.invalid();
        }

        let mut keys = Vec::new();
        while keys.len() < MAX_WRITE_SIZE {
            match self.read_string()? {
                Some((key, b',')) => keys.push(key),
                Some((key, b']')) => {
                    keys.push(key);
                    break;
                }
                _ => return self.invalid(),
            }
        }

        if keys.len() == MAX_WRITE_SIZE {
            return self.invalid();
        }
        if !self.expect_line_end()? {
            return self.invalid();
        }
        Ok(if delete {
            Command::Delete(keys)
        } else {
            Command::Read(keys)
        })
    }

    /// Parse the delay after `WAIT `. Trailing fields after a space are
    /// accepted and discarded.
    fn parse_wait(&mut self) -> Result<Command, ParseError> {
        let mut digits = String::new();
        let terminator = loop {
            match self.next_byte()? {
                None => break None,
                Some(b @ b'0'..=b'9') => digits.push(b as char),
                Some(other) => break Some(other),
            }
        };

        let delay: u64 = if digits.is_empty() {
            0
        } else {
            match digits.parse::<u64>() {
                Ok(ms) if ms <= u32::MAX as u64 => ms,
                _ => return self.invalid(),
            }
        };

        match terminator {
            None | Some(b'\n') => Ok(Command::Wait(delay)),
            Some(b' ') => {
                self.skip_line()?;
                Ok(Command::Wait(delay))
            }
            Some(_) => self.invalid(),
        }
    }

    /// Tokenize the next command, skipping blanks and comments.
    /// `None` means end of commands.
    pub fn next_command(&mut self) -> Option<Result<Command, ParseError>> {
        loop {
            let first = match self.next_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            let parsed = match first {
                b'\n' => continue,
                b'#' => match self.skip_line() {
                    Ok(()) => continue,
                    Err(e) => Err(e),
                },
                b'W' => self.parse_w(),
                b'R' => self.keyword_then(b"EAD ", |r| r.parse_key_list(false)),
                b'D' => self.keyword_then(b"ELETE ", |r| r.parse_key_list(true)),
                b'S' => self.bare_keyword(b"HOW", Command::Show),
                b'B' => self.bare_keyword(b"ACKUP", Command::Backup),
                b'H' => self.bare_keyword(b"ELP", Command::Help),
                _ => self.invalid(),
            };
            return Some(parsed);
        }
    }

    /// Disambiguate WAIT from WRITE: both start with `W`.
    fn parse_w(&mut self) -> Result<Command, ParseError> {
        // Four bytes decide: "AIT " is WAIT, "RIT" + "E " is WRITE.
        let mut lead = [0u8; 4];
        for slot in &mut lead {
            match self.next_byte()? {
                Some(byte) => *slot = byte,
                None => return self.invalid(),
            }
        }
        if &lead == b"AIT " {
            return self.parse_wait();
        }
        if &lead == b"RITE" {
            if self.next_byte()? != Some(b' ') {
                return self.invalid();
            }
            return self.parse_write();
        }
        self.invalid()
    }

    fn keyword_then(
        &mut self,
        rest: &[u8],
        parse: impl FnOnce(&mut Self) -> Result<Command, ParseError>,
    ) -> Result<Command, ParseError> {
        if !self.expect_keyword(rest)? {
            return self.invalid();
        }
        parse(self)
    }

    fn bare_keyword(&mut self, rest: &[u8], command: Command) -> Result<Command, ParseError> {
        if !self.expect_keyword(rest)? {
            return self.invalid();
        }
        if !self.expect_line_end()? {
            return self.invalid();
        }
        Ok(command)
    }
}

impl<R: Read> Iterator for CommandReader<R> {
    type Item = Result<Command, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command()
    }
}
