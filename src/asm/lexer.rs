// MiniVM: minimal register-based virtual machine & assembler.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2024 by
//     Dr Maxim Orlovsky <orlovsky@ubideco.org>
//
// Copyright (C) 2021-2024 UBIDECO Labs,
//     Laboratories for Distributed and Cognitive Computing, Switzerland.
//     All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hand-written one-pass scanner over a borrowed source buffer.

use super::AssembleError;

#[inline]
const fn is_whitespace(c: u8) -> bool { matches!(c, b' ' | b'\t' | b'\r' | b'\n') }

/// Kind of a scanned token, determined by its first byte.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum TokenType {
    /// `.identifier`: label definition or reference.
    Label,

    /// `@identifier`: extern declaration or reference.
    External,

    /// `$identifier`: constant name.
    CName,

    /// Any other non-whitespace run.
    Ident,
}

/// A token borrowed from the source buffer.
///
/// For sigil-prefixed tokens [`Token::source`] includes the sigil; use
/// [`Token::name`] for the bare identifier.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Token<'src> {
    /// Token kind.
    pub ty: TokenType,

    /// Token text, including the sigil byte for sigil-prefixed kinds.
    pub source: &'src str,
}

impl<'src> Token<'src> {
    /// Identifier of the token with the sigil stripped.
    pub fn name(&self) -> &'src str {
        match self.ty {
            TokenType::Ident => self.source,
            _ => &self.source[1..],
        }
    }
}

/// One-pass scanner producing [`Token`]s from assembly source.
///
/// An identifier runs to the first whitespace byte; newlines carry no
/// meaning beyond separating tokens. No backtracking happens across tokens,
/// but the caller may [`Scanner::checkpoint`] and [`Scanner::rewind`] for
/// single-token lookahead.
pub struct Scanner<'src> {
    src: &'src str,
    offset: usize,
}

impl<'src> Scanner<'src> {
    /// Constructs a scanner over the given source buffer.
    pub fn new(src: &'src str) -> Scanner<'src> { Scanner { src, offset: 0 } }

    /// Returns the current byte without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<u8> { self.src.as_bytes().get(self.offset).copied() }

    /// Consumes and returns the current byte.
    #[inline]
    pub fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.offset += 1;
        Some(c)
    }

    /// Skips spaces, tabs and line breaks.
    pub fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !is_whitespace(c) {
                break;
            }
            self.offset += 1;
        }
    }

    /// Whether the whole source has been consumed.
    #[inline]
    pub fn eof(&self) -> bool { self.offset >= self.src.len() }

    /// Position usable with [`Scanner::rewind`] for one-token lookahead.
    #[inline]
    pub fn checkpoint(&self) -> usize { self.offset }

    /// Returns the scanner to an earlier [`Scanner::checkpoint`].
    #[inline]
    pub fn rewind(&mut self, checkpoint: usize) { self.offset = checkpoint; }

    /// Produces the next token, skipping whitespace and comments; `None` at
    /// the end of input.
    pub fn next_token(&mut self) -> Option<Token<'src>> {
        loop {
            self.skip_whitespace();
            let ty = match self.peek()? {
                b'#' | b';' => {
                    while let Some(c) = self.advance() {
                        if c == b'\n' {
                            break;
                        }
                    }
                    continue;
                }
                b'$' => TokenType::CName,
                b'@' => TokenType::External,
                b'.' => TokenType::Label,
                _ => TokenType::Ident,
            };
            let start = self.offset;
            while let Some(c) = self.peek() {
                if is_whitespace(c) {
                    break;
                }
                self.offset += 1;
            }
            return Some(Token { ty, source: &self.src[start..self.offset] });
        }
    }

    /// Reads a `"…"`-delimited string literal, the opening quote being the
    /// current byte.
    ///
    /// Escape sequences: `\n` produces a newline; `\xDDD…` reads the
    /// following digits as a *decimal* character code; any other `\c`
    /// produces the literal `c`. Running off the end of input fails.
    pub fn read_string_literal(&mut self) -> Result<String, AssembleError> {
        debug_assert_eq!(self.peek(), Some(b'"'), "string literal must start at a quote");
        self.offset += 1;

        let mut string = String::new();
        loop {
            let c = self.advance().ok_or(AssembleError::StringEof)?;
            match c {
                b'"' => return Ok(string),
                b'\\' => {
                    let escape = self.advance().ok_or(AssembleError::StringEof)?;
                    match escape {
                        b'n' => string.push('\n'),
                        b'x' => {
                            let mut code = 0u32;
                            let mut digits = 0usize;
                            while let Some(d) = self.peek() {
                                if !d.is_ascii_digit() {
                                    break;
                                }
                                code = code * 10 + (d - b'0') as u32;
                                digits += 1;
                                self.offset += 1;
                            }
                            if digits == 0 {
                                return Err(AssembleError::InvalidEscape);
                            }
                            string.push(code as u8 as char);
                        }
                        other => string.push(other as char),
                    }
                }
                other => string.push(other as char),
            }
        }
    }
}
