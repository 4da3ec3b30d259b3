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

use std::fmt::{self, Display, Formatter};

use super::{Instr, Operands};
use crate::core::Reg;

/// Packed instruction record; one entry of the program's code segment.
///
/// Register operands live in the four nibbles of the low 16 bits of
/// [`Opcode::warg0`]; instructions taking a label or extern reference use
/// the whole 32-bit `warg0` instead. The two views alias the same storage
/// as a space optimisation, not an ambiguity, since no instruction decodes
/// both (see [`Instr::operands`]).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Opcode {
    /// Instruction tag.
    pub instr: Instr,

    /// Wide argument: either four packed register nibbles or a 32-bit
    /// label/extern table index.
    pub warg0: u32,

    /// 16-bit immediate: constant-pool index or extern-table index,
    /// depending on the instruction.
    pub arg1: u16,
}

impl Opcode {
    /// Constructs an opcode with all argument fields zeroed.
    #[inline]
    pub fn new(instr: Instr) -> Opcode { Opcode { instr, warg0: 0, arg1: 0 } }

    /// Reads the register operand from nibble `no` (0..4) of the packed
    /// argument word.
    #[inline]
    pub fn reg(&self, no: u8) -> Reg {
        debug_assert!(no < 4, "register nibble out of the opcode encoding");
        Reg::from_nibble((self.warg0 >> (no * 4)) as u8)
    }

    /// Writes the register operand into nibble `no` (0..4) of the packed
    /// argument word.
    #[inline]
    pub fn set_reg(&mut self, no: u8, reg: Reg) {
        debug_assert!(no < 4, "register nibble out of the opcode encoding");
        let shift = no * 4;
        self.warg0 = (self.warg0 & !(0xF << shift)) | ((reg.index() as u32) << shift);
    }

    /// First register operand.
    #[inline]
    pub fn reg0(&self) -> Reg { self.reg(0) }

    /// Second register operand.
    #[inline]
    pub fn reg1(&self) -> Reg { self.reg(1) }

    /// Third register operand.
    #[inline]
    pub fn reg2(&self) -> Reg { self.reg(2) }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instr)?;
        match self.instr.operands() {
            Operands::None => Ok(()),
            Operands::Reg => write!(f, " {}", self.reg0()),
            Operands::RegReg => write!(f, " {}, {}", self.reg0(), self.reg1()),
            Operands::RegRegReg => {
                write!(f, " {}, {}, {}", self.reg0(), self.reg1(), self.reg2())
            }
            Operands::RegConst => write!(f, " {}, ${}", self.reg0(), self.arg1),
            Operands::RegExtern => write!(f, " {}, @{}", self.reg0(), self.arg1),
            Operands::Label => write!(f, " .{}", self.warg0),
            Operands::Extern => write!(f, " @{}", self.warg0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reg(no: u8) -> Reg { Reg::with(no).unwrap() }

    #[test]
    fn nibble_packing() {
        let mut op = Opcode::new(Instr::AddI);
        op.set_reg(0, reg(2));
        op.set_reg(1, reg(0));
        op.set_reg(2, reg(15));
        assert_eq!(op.warg0, 0x0F02);
        assert_eq!(op.reg0(), reg(2));
        assert_eq!(op.reg1(), reg(0));
        assert_eq!(op.reg2(), reg(15));
    }

    #[test]
    fn set_reg_overwrites() {
        let mut op = Opcode::new(Instr::Mov);
        op.set_reg(0, reg(15));
        op.set_reg(0, reg(1));
        assert_eq!(op.reg0(), reg(1));
        assert_eq!(op.warg0, 0x0001);
    }

    #[test]
    fn display_forms() {
        let mut op = Opcode::new(Instr::AddI);
        op.set_reg(0, reg(2));
        op.set_reg(1, reg(0));
        op.set_reg(2, reg(1));
        assert_eq!(op.to_string(), "addi r2, r0, r1");

        let mut op = Opcode::new(Instr::LoadC);
        op.set_reg(0, reg(7));
        op.arg1 = 3;
        assert_eq!(op.to_string(), "loadc r7, $3");

        let mut op = Opcode::new(Instr::Jump);
        op.warg0 = 5;
        assert_eq!(op.to_string(), "jump .5");

        assert_eq!(Opcode::new(Instr::Ret).to_string(), "ret");
    }
}
