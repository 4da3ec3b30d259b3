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

//! Assembler for the MiniVM assembly dialect.
//!
//! The dialect is token-oriented; line breaks are ordinary whitespace.
//! `#` and `;` start a comment running to the end of the line. The four
//! top-level forms are:
//!
//! * `.name [stackalloc]`: label definition with an optional decimal count
//!   of operand-stack bytes to reserve when the label is `call`ed;
//! * `$name <value>`: constant definition, where the value is a string
//!   literal `"…"` or a sigil-prefixed scalar `u…`, `i…`/`s…`, `f…`;
//! * `@name`: extern slot declaration;
//! * `<mnemonic> <operand>*`: instruction, with operands `r0`..`r15`,
//!   `$name`, `@name`, `.name` or an inline constant literal.
//!
//! Assembly happens in one pass over the token stream followed by the fixup
//! passes resolving forward label references and interned-string pointers;
//! see [`crate::Program::assemble`].

pub mod lexer;
mod parser;

use std::io;

/// Errors assembling a program image from source text.
///
/// Any of these aborts the load: no partial program is executable after a
/// failure.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum AssembleError {
    /// unknown instruction `{0}`
    UnknownInstruction(String),

    /// duplicate label `{0}` detected
    DuplicateLabel(String),

    /// duplicate external `{0}` detected
    DuplicateExtern(String),

    /// duplicate constant `{0}` detected
    DuplicateConstant(String),

    /// unknown constant `{0}`
    UnknownConstant(String),

    /// unknown external `{0}`
    UnknownExtern(String),

    /// jump to unknown label `{0}`
    UnknownLabel(String),

    /// invalid register token `{0}`
    InvalidRegister(String),

    /// invalid numeric literal `{0}`
    InvalidNumber(String),

    /// value of constant `{0}` has unknown type
    UnknownConstantType(String),

    /// invalid escape sequence in a string literal
    InvalidEscape,

    /// reached EOF while reading a string literal
    StringEof,

    /// reached EOF while reading {0}
    UnexpectedEof(String),

    /// constant pool size exceeds the 16-bit opcode immediate
    ConstantOverflow,

    /// extern table size exceeds the 16-bit opcode immediate
    ExternOverflow,

    /// opcode {0} references label table entry {1} which does not exist
    LabelBounds(usize, u32),

    /// opcode {0} references constant pool entry {1} which does not exist
    ConstantBounds(usize, u16),

    /// opcode {0} references extern table entry {1} which does not exist
    ExternBounds(usize, u32),

    /// unable to read assembly source file: {0}
    #[from]
    Io(io::Error),
}
