//! Single-pass parser for the maps text format:
//!
//! ```text
//! <start>-<end> <perms> <offset> <dev> <inode> [spaces] [pathname]
//! ```
//!
//! Every field ends at a character that is fixed by the grammar, so the
//! cursor only ever moves forward.

use std::{ffi::OsString, str};

use super::{Permissions, Region};
use crate::error::{Error, Result};

/// Characters that end a field no matter which field is being read.
fn is_line_break(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r' || byte == b'\0'
}

fn ends_hex(byte: u8) -> bool {
    is_line_break(byte) || byte == b' ' || byte == b'-'
}

fn ends_word(byte: u8) -> bool {
    is_line_break(byte) || byte == b' '
}

#[cfg(unix)]
fn to_os_string(bytes: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(bytes.to_vec())
}

#[cfg(not(unix))]
fn to_os_string(bytes: &[u8]) -> OsString {
    String::from_utf8_lossy(bytes).into_owned().into()
}

struct Cursor<'a> {
    text: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a [u8]) -> Self {
        Cursor { text, pos: 0 }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn error_at(&self, offset: usize, expected: &'static str) -> Error {
        Error::MalformedMapSyntax { offset, expected }
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> Result<()> {
        if self.peek() != Some(byte) {
            return Err(self.error_at(self.pos, expected));
        }
        self.pos += 1;
        Ok(())
    }

    /// Advances up to the first byte matching `stop` and returns the consumed bytes.
    fn take_until(&mut self, stop: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if stop(byte) {
                break;
            }
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn hex(&mut self, expected: &'static str) -> Result<u64> {
        let start = self.pos;
        let run = self.take_until(ends_hex);
        if run.is_empty() {
            return Err(self.error_at(start, expected));
        }

        let mut value: u64 = 0;
        for (idx, &byte) in run.iter().enumerate() {
            let digit = (byte as char)
                .to_digit(16)
                .ok_or_else(|| self.error_at(start + idx, "hexadecimal digit"))?;
            value = value
                .checked_mul(16)
                .and_then(|value| value.checked_add(u64::from(digit)))
                .ok_or_else(|| self.error_at(start, "hexadecimal value within 64 bits"))?;
        }
        Ok(value)
    }

    fn word(&mut self, expected: &'static str) -> Result<&'a str> {
        let start = self.pos;
        let word = self.take_until(ends_word);
        if word.is_empty() {
            return Err(self.error_at(start, expected));
        }
        str::from_utf8(word).map_err(|err| self.error_at(start + err.valid_up_to(), expected))
    }

    fn permissions(&mut self) -> Result<Permissions> {
        let block = self
            .text
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.error_at(self.pos, "4-character permission block"))?;
        let perms = Permissions::from_block([block[0], block[1], block[2], block[3]]);
        self.pos += 4;
        Ok(perms)
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    /// Consumes `\n`, `\r` or `\r\n`. The last line may end with the text.
    fn line_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(b'\n') => {
                self.pos += 1;
                Ok(())
            }
            Some(b'\r') => {
                self.pos += 1;
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
                Ok(())
            }
            Some(_) => Err(self.error_at(self.pos, "end of line")),
        }
    }

    fn region(&mut self) -> Result<Region> {
        let start = self.hex("start address")?;
        self.expect(b'-', "'-' after start address")?;
        let end = self.hex("end address")?;
        self.expect(b' ', "space after end address")?;

        let permissions = self.permissions()?;
        self.expect(b' ', "space after permissions")?;

        let offset = self.hex("file offset")?;
        self.expect(b' ', "space after file offset")?;

        let device = self.word("device")?;
        self.expect(b' ', "space after device")?;

        let inode = self.word("inode")?;
        self.skip_spaces();
        let pathname = self.take_until(is_line_break);
        self.line_end()?;

        Ok(Region {
            start,
            end,
            permissions,
            offset,
            device: device.to_owned(),
            inode: inode.to_owned(),
            pathname: to_os_string(pathname),
        })
    }
}

pub(super) fn parse(text: &[u8]) -> Result<Vec<Region>> {
    let mut cursor = Cursor::new(text);
    let mut regions = Vec::new();
    while !cursor.is_at_end() {
        regions.push(cursor.region()?);
    }
    Ok(regions)
}
