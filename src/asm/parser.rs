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

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, trace};

use super::lexer::{Scanner, Token, TokenType};
use super::AssembleError;
use crate::core::{Reg, Word};
use crate::isa::{Instr, Opcode, Operands};
use crate::program::{ConstantValue, ExternId, Label, LabelId, Program};

/// Forward label references carry an index into the pending-name table with
/// this bit set until the reference-fixup pass resolves them.
const FUTURE_LABEL_BIT: u32 = 0x8000_0000;

/// Prefix under which inline constant literals are interned in the constant
/// name map; duplicates of the same literal silently reuse one pool entry.
const INLINE_CONSTANT_PREFIX: &str = "%_impl_";

impl Program {
    /// Assembles source text into an executable program image.
    ///
    /// On failure no partial image is produced; the error describes the
    /// first problem encountered.
    pub fn assemble(source: &str) -> Result<Program, AssembleError> {
        Assembler::new(source).run()
    }

    /// Reads a source file and assembles it.
    pub fn assemble_file(path: impl AsRef<Path>) -> Result<Program, AssembleError> {
        let source = fs::read_to_string(path)?;
        Program::assemble(&source)
    }
}

struct Assembler<'src> {
    scanner: Scanner<'src>,
    program: Program,
    constant_map: BTreeMap<String, u16>,
    string_table: BTreeMap<String, u32>,
    future_labels: Vec<String>,
}

impl<'src> Assembler<'src> {
    fn new(source: &'src str) -> Assembler<'src> {
        Assembler {
            scanner: Scanner::new(source),
            program: Program::empty(),
            constant_map: BTreeMap::new(),
            string_table: BTreeMap::new(),
            future_labels: vec![],
        }
    }

    fn run(mut self) -> Result<Program, AssembleError> {
        while let Some(token) = self.scanner.next_token() {
            match token.ty {
                TokenType::Label => self.read_label(token)?,
                TokenType::External => self.read_external(token)?,
                TokenType::CName => {
                    let name = token.name().to_owned();
                    if self.constant_map.contains_key(&name) {
                        return Err(AssembleError::DuplicateConstant(name));
                    }
                    let value = self.read_constant_value(&name)?;
                    self.push_constant(name, value)?;
                }
                TokenType::Ident => self.read_opcode(token)?,
            }
        }

        // Fixups run in a fixed order: interning label names appends to the
        // data segment, so every append must happen before absolute string
        // addresses are computed.
        self.fix_label_names();
        self.fix_label_refs()?;
        self.fix_constant_pointers();
        self.verify_bounds()?;

        debug!(
            opcodes = self.program.opcodes.len(),
            constants = self.program.constants.len(),
            labels = self.program.labels.len(),
            externs = self.program.externs.len(),
            data = self.program.data.len(),
            "assembled program image"
        );
        Ok(self.program)
    }

    fn require_token(&mut self, what: &str) -> Result<Token<'src>, AssembleError> {
        self.scanner
            .next_token()
            .ok_or_else(|| AssembleError::UnexpectedEof(what.to_owned()))
    }

    /// Defines a label at the current opcode position, consuming a numeric
    /// stack-allocation token if one follows.
    fn read_label(&mut self, token: Token) -> Result<(), AssembleError> {
        let name = token.name();
        if self.program.label_map.contains_key(name) {
            return Err(AssembleError::DuplicateLabel(name.to_owned()));
        }
        let stackalloc = self.read_stackalloc();
        let id = LabelId(self.program.labels.len() as u32);
        self.program.labels.push(Label {
            name: 0,
            pc: self.program.opcodes.len() as u32,
            stackalloc,
        });
        self.program.label_map.insert(name.to_owned(), id);
        trace!("label `{name}` at pc {} reserving {stackalloc} stack bytes", self.program.opcodes.len());
        Ok(())
    }

    fn read_stackalloc(&mut self) -> u32 {
        let mark = self.scanner.checkpoint();
        if let Some(token) = self.scanner.next_token() {
            if token.ty == TokenType::Ident {
                if let Ok(bytes) = token.source.parse::<u32>() {
                    return bytes;
                }
            }
        }
        self.scanner.rewind(mark);
        0
    }

    /// Declares an extern slot; forward references to externs are not
    /// allowed, so a declaration must precede every use.
    fn read_external(&mut self, token: Token) -> Result<(), AssembleError> {
        let name = token.name();
        if self.program.extern_map.contains_key(name) {
            return Err(AssembleError::DuplicateExtern(name.to_owned()));
        }
        if self.program.externs.len() > u16::MAX as usize {
            return Err(AssembleError::ExternOverflow);
        }
        let id = ExternId(self.program.externs.len() as u32);
        self.program.externs.push(Cell::new(Word::ZERO));
        self.program.natives.push(None);
        self.program.extern_map.insert(name.to_owned(), id);
        Ok(())
    }

    /// Reads a constant value literal: a string in quotes or a scalar
    /// prefixed with its type sigil (`u`, `s`/`i`, `f`).
    fn read_constant_value(&mut self, name: &str) -> Result<ConstantValue, AssembleError> {
        self.scanner.skip_whitespace();
        match self.scanner.peek() {
            None => Err(AssembleError::UnexpectedEof(format!("a value for constant `{name}`"))),
            Some(b'"') => {
                let literal = self.scanner.read_string_literal()?;
                Ok(ConstantValue::data_offset(self.write_string(&literal)))
            }
            Some(b'u' | b's' | b'i' | b'f') => {
                let token = self.require_token(&format!("a value for constant `{name}`"))?;
                self.parse_scalar(token.source)
            }
            Some(_) => {
                self.require_token(&format!("a value for constant `{name}`"))?;
                Err(AssembleError::UnknownConstantType(name.to_owned()))
            }
        }
    }

    /// Parses a sigil-prefixed scalar literal. The `s` sigil for signed
    /// values is a historical alias of `i`; both are accepted.
    fn parse_scalar(&self, source: &str) -> Result<ConstantValue, AssembleError> {
        let digits = &source[1..];
        let invalid = || AssembleError::InvalidNumber(source.to_owned());
        match source.as_bytes()[0] {
            b'u' => digits.parse::<u64>().map(ConstantValue::word).map_err(|_| invalid()),
            b's' | b'i' => digits.parse::<i64>().map(ConstantValue::word).map_err(|_| invalid()),
            b'f' => digits.parse::<f64>().map(ConstantValue::word).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }

    fn push_constant(&mut self, name: String, value: ConstantValue) -> Result<u16, AssembleError> {
        let index = self.program.constants.len();
        if index > u16::MAX as usize {
            return Err(AssembleError::ConstantOverflow);
        }
        self.program.constants.push(value);
        self.constant_map.insert(name, index as u16);
        Ok(index as u16)
    }

    /// Appends a NUL-terminated string to the data segment, deduplicating
    /// identical contents, and returns its start offset.
    fn write_string(&mut self, string: &str) -> u32 {
        if let Some(&offset) = self.string_table.get(string) {
            return offset;
        }
        let offset = self.program.data.len() as u32;
        self.program.data.extend_from_slice(string.as_bytes());
        self.program.data.push(0);
        self.string_table.insert(string.to_owned(), offset);
        offset
    }

    /// Decodes an instruction mnemonic and its operands into a packed
    /// opcode.
    fn read_opcode(&mut self, token: Token) -> Result<(), AssembleError> {
        let Some(instr) = Instr::from_mnemonic(token.source) else {
            return Err(AssembleError::UnknownInstruction(token.source.to_owned()));
        };

        let mut opcode = Opcode::new(instr);
        match instr.operands() {
            Operands::None => {}
            Operands::Reg => opcode.set_reg(0, self.read_register()?),
            Operands::RegReg => {
                opcode.set_reg(0, self.read_register()?);
                opcode.set_reg(1, self.read_register()?);
            }
            Operands::RegRegReg => {
                opcode.set_reg(0, self.read_register()?);
                opcode.set_reg(1, self.read_register()?);
                opcode.set_reg(2, self.read_register()?);
            }
            Operands::RegConst => {
                opcode.set_reg(0, self.read_register()?);
                opcode.arg1 = self.read_constant_operand()?;
            }
            Operands::RegExtern => {
                opcode.set_reg(0, self.read_register()?);
                opcode.arg1 = self.read_extern_operand()?.0 as u16;
            }
            Operands::Label => opcode.warg0 = self.read_label_operand()?,
            Operands::Extern => opcode.warg0 = self.read_extern_operand()?.0,
        }

        trace!("@{:04}: {opcode}", self.program.opcodes.len());
        self.program.opcodes.push(opcode);
        Ok(())
    }

    /// Reads an `rN` register operand with `N` in `0..15`.
    fn read_register(&mut self) -> Result<Reg, AssembleError> {
        let token = self.require_token("a register operand")?;
        token
            .source
            .parse()
            .map_err(|_| AssembleError::InvalidRegister(token.source.to_owned()))
    }

    /// Reads a constant operand: a `$name` reference or an inline literal.
    ///
    /// Inline literals become constants named `%_impl_<literal-text>`; a
    /// repeated literal reuses the existing pool entry instead of failing as
    /// a duplicate definition.
    fn read_constant_operand(&mut self) -> Result<u16, AssembleError> {
        self.scanner.skip_whitespace();
        match self.scanner.peek() {
            None => Err(AssembleError::UnexpectedEof("a constant operand".to_owned())),
            Some(b'$') => {
                let token = self.require_token("a constant operand")?;
                let name = token.name();
                self.constant_map
                    .get(name)
                    .copied()
                    .ok_or_else(|| AssembleError::UnknownConstant(name.to_owned()))
            }
            Some(b'"') => {
                let literal = self.scanner.read_string_literal()?;
                let name = format!("{INLINE_CONSTANT_PREFIX}{literal}");
                if let Some(&index) = self.constant_map.get(&name) {
                    return Ok(index);
                }
                let value = ConstantValue::data_offset(self.write_string(&literal));
                self.push_constant(name, value)
            }
            Some(b'u' | b's' | b'i' | b'f') => {
                let token = self.require_token("a constant operand")?;
                let name = format!("{INLINE_CONSTANT_PREFIX}{}", token.source);
                if let Some(&index) = self.constant_map.get(&name) {
                    return Ok(index);
                }
                let value = self.parse_scalar(token.source)?;
                self.push_constant(name, value)
            }
            Some(_) => {
                let token = self.require_token("a constant operand")?;
                Err(AssembleError::UnknownConstantType(token.source.to_owned()))
            }
        }
    }

    /// Reads a `.name` label operand. An undefined name is recorded as a
    /// forward reference and resolved by the fixup pass.
    fn read_label_operand(&mut self) -> Result<u32, AssembleError> {
        let token = self.require_token("a label operand")?;
        if token.ty != TokenType::Label {
            return Err(AssembleError::UnknownLabel(token.source.to_owned()));
        }
        let name = token.name();
        if let Some(id) = self.program.label_map.get(name) {
            return Ok(id.0);
        }
        self.future_labels.push(name.to_owned());
        Ok((self.future_labels.len() - 1) as u32 | FUTURE_LABEL_BIT)
    }

    /// Reads an `@name` extern operand; externs allow no forward
    /// references.
    fn read_extern_operand(&mut self) -> Result<ExternId, AssembleError> {
        let token = self.require_token("an external operand")?;
        if token.ty != TokenType::External {
            return Err(AssembleError::UnknownExtern(token.source.to_owned()));
        }
        let name = token.name();
        self.program
            .extern_map
            .get(name)
            .copied()
            .ok_or_else(|| AssembleError::UnknownExtern(name.to_owned()))
    }

    /// Interns every label name into the now-stable data segment and points
    /// the labels at their interned copies.
    fn fix_label_names(&mut self) {
        let names: Vec<(LabelId, String)> = self
            .program
            .label_map
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        for (id, name) in names {
            let offset = self.write_string(&name);
            self.program.labels[id.0 as usize].name = offset;
        }
    }

    /// Replaces forward-reference tombstones in branch opcodes with the
    /// resolved label ids.
    fn fix_label_refs(&mut self) -> Result<(), AssembleError> {
        for no in 0..self.program.opcodes.len() {
            let opcode = self.program.opcodes[no];
            if !matches!(opcode.instr, Instr::Call | Instr::Jump | Instr::Jeq | Instr::Jne) {
                continue;
            }
            if opcode.warg0 & FUTURE_LABEL_BIT == 0 {
                continue;
            }
            let name = &self.future_labels[(opcode.warg0 & !FUTURE_LABEL_BIT) as usize];
            let id = *self
                .program
                .label_map
                .get(name)
                .ok_or_else(|| AssembleError::UnknownLabel(name.clone()))?;
            self.program.opcodes[no].warg0 = id.0;
        }
        Ok(())
    }

    /// Converts data-segment offsets held by string constants into absolute
    /// addresses. The data segment is frozen from here on: the addresses
    /// stay valid for the life of the program image.
    fn fix_constant_pointers(&mut self) {
        let base = self.program.data.as_ptr() as u64;
        for constant in &mut self.program.constants {
            if constant.is_data_offset {
                constant.value = Word::from(base + constant.value.u());
                constant.is_data_offset = false;
                constant.is_pointer = true;
            }
        }
    }

    /// Final load-time check that every table index packed into an opcode
    /// stays within its table.
    fn verify_bounds(&self) -> Result<(), AssembleError> {
        for (no, opcode) in self.program.opcodes.iter().enumerate() {
            match opcode.instr.operands() {
                Operands::Label => {
                    if opcode.warg0 as usize >= self.program.labels.len() {
                        return Err(AssembleError::LabelBounds(no, opcode.warg0));
                    }
                }
                Operands::Extern => {
                    if opcode.warg0 as usize >= self.program.externs.len() {
                        return Err(AssembleError::ExternBounds(no, opcode.warg0));
                    }
                }
                Operands::RegExtern => {
                    if opcode.arg1 as usize >= self.program.externs.len() {
                        return Err(AssembleError::ExternBounds(no, opcode.arg1 as u32));
                    }
                }
                Operands::RegConst => {
                    if opcode.arg1 as usize >= self.program.constants.len() {
                        return Err(AssembleError::ConstantBounds(no, opcode.arg1));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_definitions() {
        let program = Program::assemble("$a u7 $b i-3 $c s12 $d f2.5").unwrap();
        assert_eq!(program.constants.len(), 4);
        assert_eq!(program.constants[0].value.u(), 7);
        assert_eq!(program.constants[1].value.i(), -3);
        assert_eq!(program.constants[2].value.i(), 12);
        assert_eq!(program.constants[3].value.f(), 2.5);
    }

    #[test]
    fn duplicate_definitions_fail() {
        assert!(matches!(
            Program::assemble("$a u1 $a u2"),
            Err(AssembleError::DuplicateConstant(name)) if name == "a"
        ));
        assert!(matches!(
            Program::assemble(".main ret .main ret"),
            Err(AssembleError::DuplicateLabel(name)) if name == "main"
        ));
        assert!(matches!(
            Program::assemble("@v @v"),
            Err(AssembleError::DuplicateExtern(name)) if name == "v"
        ));
    }

    #[test]
    fn string_interning_deduplicates() {
        let program = Program::assemble(r#"$a "shared" $b "shared" $c "other""#).unwrap();
        assert_eq!(program.constants[0].value, program.constants[1].value);
        assert!(program.constants[0].is_pointer);
        assert!(!program.constants[0].is_data_offset);
        assert_ne!(program.constants[0].value, program.constants[2].value);
    }

    #[test]
    fn pointer_fixup_resolves_to_nul_terminated_bytes() {
        let program = Program::assemble(r#"$s "hi""#).unwrap();
        let constant = &program.constants[0];
        assert!(constant.is_pointer);
        let base = program.data.as_ptr() as u64;
        let offset = (constant.value.u() - base) as usize;
        assert_eq!(&program.data[offset..offset + 3], b"hi\0");
    }

    #[test]
    fn inline_literals_reuse_pool_entries() {
        let program = Program::assemble(
            "
            .main
                loadc r0 u7
                loadc r1 u7
                loadc r2 u8
                ret
            ",
        )
        .unwrap();
        assert_eq!(program.opcodes[0].arg1, program.opcodes[1].arg1);
        assert_ne!(program.opcodes[0].arg1, program.opcodes[2].arg1);
        assert_eq!(program.constants.len(), 2);
    }

    #[test]
    fn forward_label_references_resolve() {
        let program = Program::assemble(
            "
            .main
                jump .end
                printi r0
            .end
                ret
            ",
        )
        .unwrap();
        let end = program.label_id("end").unwrap();
        assert_eq!(program.opcodes[0].warg0, end.0);
        assert_eq!(program.label(end).pc, 2);
    }

    #[test]
    fn unknown_forward_label_fails() {
        assert!(matches!(
            Program::assemble(".main jump .nowhere ret"),
            Err(AssembleError::UnknownLabel(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn stackalloc_is_optional() {
        let program = Program::assemble(".plain ret .alloc 24 ret").unwrap();
        let plain = program.label(program.label_id("plain").unwrap());
        let alloc = program.label(program.label_id("alloc").unwrap());
        assert_eq!(plain.stackalloc, 0);
        assert_eq!(alloc.stackalloc, 24);
        assert_eq!(alloc.pc, 1);
    }

    #[test]
    fn label_names_interned_into_data() {
        let program = Program::assemble(".main ret").unwrap();
        let label = program.label(program.label_id("main").unwrap());
        assert_eq!(program.cstr_at(label.name), b"main");
    }

    #[test]
    fn register_bounds_checked() {
        assert!(matches!(
            Program::assemble(".main printi r16 ret"),
            Err(AssembleError::InvalidRegister(token)) if token == "r16"
        ));
        assert!(matches!(
            Program::assemble(".main printi rx ret"),
            Err(AssembleError::InvalidRegister(token)) if token == "rx"
        ));
    }

    #[test]
    fn extern_references_need_declaration() {
        assert!(matches!(
            Program::assemble(".main eload r0 @missing ret"),
            Err(AssembleError::UnknownExtern(name)) if name == "missing"
        ));
        assert!(Program::assemble("@v .main eload r0 @v ret").is_ok());
    }

    #[test]
    fn unknown_instruction_reports_mnemonic() {
        assert!(matches!(
            Program::assemble(".main frobnicate r0"),
            Err(AssembleError::UnknownInstruction(name)) if name == "frobnicate"
        ));
    }

    #[test]
    fn truncated_operand_reports_eof() {
        assert!(matches!(
            Program::assemble(".main loadc r0"),
            Err(AssembleError::UnexpectedEof(_))
        ));
        assert!(matches!(Program::assemble("$a"), Err(AssembleError::UnexpectedEof(_))));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            Program::assemble("$a u12x"),
            Err(AssembleError::InvalidNumber(text)) if text == "u12x"
        ));
        // overflow of the 64-bit range is a parse failure, not a wrap
        assert!(matches!(
            Program::assemble("$a u99999999999999999999"),
            Err(AssembleError::InvalidNumber(_))
        ));
    }
}
