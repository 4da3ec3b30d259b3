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

use std::fmt::{self, Debug, Formatter};
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use super::Word;

/// Number of general-purpose registers in the register file.
///
/// The value is fixed by the opcode encoding: register operands are 4-bit
/// fields.
pub const REG_COUNT: usize = 16;

/// Index of a general-purpose register, guaranteed to be in `0..16` by
/// construction.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[display("r{0}")]
pub struct Reg(u8);

impl Reg {
    /// Constructs a register index, returning `None` for values outside of
    /// the register file.
    #[inline]
    pub fn with(index: u8) -> Option<Reg> {
        if (index as usize) < REG_COUNT {
            Some(Reg(index))
        } else {
            None
        }
    }

    /// Constructs a register index from the low nibble of a byte, discarding
    /// the high bits.
    #[inline]
    pub(crate) const fn from_nibble(bits: u8) -> Reg { Reg(bits & 0x0F) }

    /// Numeric value of the index.
    #[inline]
    pub const fn index(self) -> u8 { self.0 }
}

/// Error parsing a register name, which must be `r0`..`r15`.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display("invalid register name")]
pub struct ParseRegError;

impl FromStr for Reg {
    type Err = ParseRegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('r')
            .and_then(|digits| digits.parse::<u8>().ok())
            .and_then(Reg::with)
            .ok_or(ParseRegError)
    }
}

/// State of a single execution core: the register file proper plus the three
/// scalar control registers.
///
/// The whole structure is saved on `call` and restored on `ret`, which is
/// what releases a callee stack allocation: restoring `sp` rewinds the
/// operand-stack watermark to the caller's value.
#[derive(Clone, Eq, PartialEq)]
pub struct CoreRegs {
    /// General-purpose registers `r0`..`r15`.
    pub r: [Word; REG_COUNT],

    /// Program counter: index into the opcode vector of the program being
    /// executed. Uses wrapping arithmetic so that branch handlers can encode
    /// a jump to target `t` as `t - 1`, compensated by the unconditional
    /// post-increment of the dispatch loop.
    pub pc: u32,

    /// Result of the last `cmp` instruction: the signed difference between
    /// its second and first operand. Zero means the operands were equal.
    pub cmp: i64,

    /// Watermark into the operand byte-stack marking the start of the
    /// current frame's local area.
    pub sp: u32,
}

impl Default for CoreRegs {
    #[inline]
    fn default() -> Self { CoreRegs { r: [Word::ZERO; REG_COUNT], pc: 0, cmp: 0, sp: 0 } }
}

impl CoreRegs {
    /// Initializes the register file with all registers and control fields
    /// set to zero.
    #[inline]
    pub fn new() -> CoreRegs { default!() }
}

impl Index<Reg> for CoreRegs {
    type Output = Word;

    #[inline]
    fn index(&self, reg: Reg) -> &Word { &self.r[reg.index() as usize] }
}

impl IndexMut<Reg> for CoreRegs {
    #[inline]
    fn index_mut(&mut self, reg: Reg) -> &mut Word { &mut self.r[reg.index() as usize] }
}

impl Debug for CoreRegs {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "pc {}, cmp {}, sp {}", self.pc, self.cmp, self.sp)?;
        for (no, val) in self.r.iter().enumerate() {
            if val.u() != 0 {
                writeln!(f, "r{no} {val}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reg_bounds() {
        assert_eq!(Reg::with(0).map(Reg::index), Some(0));
        assert_eq!(Reg::with(15).map(Reg::index), Some(15));
        assert_eq!(Reg::with(16), None);
    }

    #[test]
    fn reg_from_str() {
        assert_eq!("r0".parse::<Reg>(), Ok(Reg(0)));
        assert_eq!("r15".parse::<Reg>(), Ok(Reg(15)));
        assert_eq!("r16".parse::<Reg>(), Err(ParseRegError));
        assert_eq!("x1".parse::<Reg>(), Err(ParseRegError));
        assert_eq!("r".parse::<Reg>(), Err(ParseRegError));
        assert_eq!("r07".parse::<Reg>().map(Reg::index), Ok(7));
    }

    #[test]
    fn nibble_masks_high_bits() {
        assert_eq!(Reg::from_nibble(0xF5).index(), 5);
        assert_eq!(Reg::from_nibble(0x0F).index(), 15);
    }

    #[test]
    fn register_indexing() {
        let mut regs = CoreRegs::new();
        let r3 = Reg::with(3).unwrap();
        regs[r3] = Word::from(42u64);
        assert_eq!(regs[r3].u(), 42);
        assert_eq!(regs.r[3].u(), 42);
    }
}
