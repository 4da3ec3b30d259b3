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
use std::fmt::{self, Debug, Display, Formatter};
use std::io;

use super::NativeFn;
use crate::core::Word;
use crate::isa::{Opcode, Operands};

/// Index of a [`Label`] in the program label table.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[display(inner)]
pub struct LabelId(pub(crate) u32);

/// Index of an extern slot in the program extern table.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[display(inner)]
pub struct ExternId(pub(crate) u32);

/// Entry of the program constant pool.
///
/// String constants are born with [`ConstantValue::is_data_offset`] set and
/// their value holding the offset of the interned NUL-terminated bytes in
/// the data segment. The assembler's pointer-fixup pass rewrites the value
/// to the absolute address of those bytes and flips the flags, so that after
/// load `is_pointer` marks every string constant.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ConstantValue {
    /// Constant word copied into a register by `loadc`.
    pub value: Word,

    /// The value is an unresolved offset into the data segment.
    pub is_data_offset: bool,

    /// The value is an absolute pointer into the data segment.
    pub is_pointer: bool,
}

impl ConstantValue {
    /// Constructs a plain scalar constant.
    #[inline]
    pub(crate) fn word(value: impl Into<Word>) -> ConstantValue {
        ConstantValue { value: value.into(), is_data_offset: false, is_pointer: false }
    }

    /// Constructs a string constant holding a not-yet-resolved data-segment
    /// offset.
    #[inline]
    pub(crate) fn data_offset(offset: u32) -> ConstantValue {
        ConstantValue { value: Word::from(offset as u64), is_data_offset: true, is_pointer: false }
    }
}

/// Named branch target with an optional operand-stack reservation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Label {
    /// Offset of the interned NUL-terminated label name in the data segment.
    pub name: u32,

    /// Opcode index the label points at.
    pub pc: u32,

    /// Number of operand-stack bytes reserved when the label is `call`ed.
    pub stackalloc: u32,
}

/// Executable program image produced by the assembler.
///
/// The image is immutable after load with one deliberate exception: extern
/// slots are shared words which both the running program (`eload`/`estore`)
/// and the host (through [`Program::set_extern`] and the binding API) may
/// write. The host must not mutate them concurrently with an in-progress
/// run; between runs and across `yield` suspension points access is free.
///
/// The data segment owns every interned string; constants marked
/// [`ConstantValue::is_pointer`] and label names reference it by absolute
/// address and offset respectively, so the image must outlive every
/// [`crate::Vm`] borrowing it, which the borrow checker enforces.
pub struct Program {
    pub(crate) data: Vec<u8>,
    pub(crate) constants: Vec<ConstantValue>,
    pub(crate) opcodes: Vec<Opcode>,
    pub(crate) label_map: BTreeMap<String, LabelId>,
    pub(crate) labels: Vec<Label>,
    pub(crate) extern_map: BTreeMap<String, ExternId>,
    pub(crate) externs: Vec<Cell<Word>>,
    pub(crate) natives: Vec<Option<NativeFn>>,
}

impl Program {
    pub(crate) fn empty() -> Program {
        Program {
            data: vec![],
            constants: vec![],
            opcodes: vec![],
            label_map: BTreeMap::new(),
            labels: vec![],
            extern_map: BTreeMap::new(),
            externs: vec![],
            natives: vec![],
        }
    }

    /// Returns the code segment.
    #[inline]
    pub fn opcodes(&self) -> &[Opcode] { &self.opcodes }

    /// Returns the constant pool.
    #[inline]
    pub fn constants(&self) -> &[ConstantValue] { &self.constants }

    /// Returns the label table.
    #[inline]
    pub fn labels(&self) -> &[Label] { &self.labels }

    /// Returns the data segment.
    #[inline]
    pub fn data(&self) -> &[u8] { &self.data }

    /// Resolves a label name into its table index.
    #[inline]
    pub fn label_id(&self, name: &str) -> Option<LabelId> { self.label_map.get(name).copied() }

    /// Returns the label for a given id.
    ///
    /// # Panics
    ///
    /// If the id does not come from this program's [`Program::label_id`].
    #[inline]
    pub fn label(&self, id: LabelId) -> &Label { &self.labels[id.0 as usize] }

    /// Resolves an extern name into its table index.
    #[inline]
    pub fn extern_id(&self, name: &str) -> Option<ExternId> { self.extern_map.get(name).copied() }

    /// Writes a typed value into a named extern slot.
    ///
    /// The value modifies the view of the underlying word matching its type:
    /// pass `u64` for the unsigned view, `i64` for the signed view and `f64`
    /// for the float view.
    pub fn set_extern(&self, name: &str, value: impl Into<Word>) -> Result<(), super::BindError> {
        let id = self
            .extern_id(name)
            .ok_or_else(|| super::BindError::UnknownExtern(name.to_owned()))?;
        self.externs[id.0 as usize].set(value.into());
        Ok(())
    }

    /// Reads the raw word of a named extern slot; use [`Word::u`],
    /// [`Word::i`] or [`Word::f`] for the typed views.
    pub fn get_extern(&self, name: &str) -> Result<Word, super::BindError> {
        let id = self
            .extern_id(name)
            .ok_or_else(|| super::BindError::UnknownExtern(name.to_owned()))?;
        Ok(self.externs[id.0 as usize].get())
    }

    #[inline]
    pub(crate) fn extern_word(&self, id: u32) -> Word { self.externs[id as usize].get() }

    #[inline]
    pub(crate) fn set_extern_word(&self, id: u32, value: Word) {
        self.externs[id as usize].set(value)
    }

    /// Returns the NUL-terminated byte run starting at `offset` in the data
    /// segment, without the terminator.
    pub(crate) fn cstr_at(&self, offset: u32) -> &[u8] {
        let tail = &self.data[offset as usize..];
        let nul = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        &tail[..nul]
    }

    /// Name of a label, read back from the data segment.
    pub fn label_name(&self, label: &Label) -> String {
        String::from_utf8_lossy(self.cstr_at(label.name)).into_owned()
    }

    fn extern_name(&self, id: u32) -> Option<&str> {
        self.extern_map
            .iter()
            .find(|(_, eid)| eid.0 == id)
            .map(|(name, _)| name.as_str())
    }

    /// Disassembles the program into the writer, one line per opcode, with
    /// label, extern and constant references resolved back to their names
    /// where possible.
    pub fn disassemble(&self, mut writer: impl io::Write) -> Result<(), io::Error> {
        for (pc, opcode) in self.opcodes.iter().enumerate() {
            for label in &self.labels {
                if label.pc as usize == pc {
                    if label.stackalloc > 0 {
                        writeln!(writer, ".{} {}", self.label_name(label), label.stackalloc)?;
                    } else {
                        writeln!(writer, ".{}", self.label_name(label))?;
                    }
                }
            }
            write!(writer, "@{pc:04}: ")?;
            match opcode.instr.operands() {
                Operands::Label => {
                    let target = &self.labels[opcode.warg0 as usize];
                    writeln!(writer, "{} .{}", opcode.instr, self.label_name(target))?;
                }
                Operands::Extern => {
                    let name = self.extern_name(opcode.warg0).unwrap_or("?");
                    writeln!(writer, "{} @{name}", opcode.instr)?;
                }
                Operands::RegExtern => {
                    let name = self.extern_name(opcode.arg1 as u32).unwrap_or("?");
                    writeln!(writer, "{} {}, @{name}", opcode.instr, opcode.reg0())?;
                }
                _ => writeln!(writer, "{opcode}")?,
            }
        }
        Ok(())
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "CODE: {} opcodes", self.opcodes.len())?;
        writeln!(f, "DATA: {} bytes", self.data.len())?;
        writeln!(f, "CONS: {} entries", self.constants.len())?;
        writeln!(f, "LBLS: {} entries", self.labels.len())?;
        writeln!(f, "EXTS: {} slots", self.externs.len())
    }
}

impl Debug for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("data", &self.data)
            .field("constants", &self.constants)
            .field("opcodes", &self.opcodes)
            .field("label_map", &self.label_map)
            .field("labels", &self.labels)
            .field("extern_map", &self.extern_map)
            .field("externs", &self.externs)
            .field("natives", &self.natives.iter().filter(|f| f.is_some()).count())
            .finish()
    }
}
