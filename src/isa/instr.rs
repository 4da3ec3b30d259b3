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

/// Operand pattern of an instruction, driving both assembly-time decoding
/// and the choice between the nibble-register and `warg0` views of the
/// packed [`super::Opcode`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Operands {
    /// No operands (`yield`, `ret`).
    None,

    /// Single register operand in `reg0` (`printi` family).
    Reg,

    /// Two register operands in `reg0`, `reg1` (stack access, moves,
    /// conversions, `cmp`).
    RegReg,

    /// Three register operands in `reg0`..`reg2` (arithmetic).
    RegRegReg,

    /// Register in `reg0` plus a constant-pool index in `arg1` (`loadc`).
    RegConst,

    /// Register in `reg0` plus an extern-table index in `arg1` (`eload`,
    /// `estore`).
    RegExtern,

    /// Label reference in `warg0` (`jump`, `jeq`, `jne`, `call`).
    Label,

    /// Extern-table index in `warg0` (`callext`).
    Extern,
}

/// Instruction tags of the MiniVM ISA.
///
/// The set is closed: every tag is listed here, and the interpreter
/// dispatches over this enum with a single `match`. Mnemonics used by the
/// assembly dialect equal the lowercase `Display` form of each tag.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum Instr {
    // Constants
    /// Copies a constant-pool entry into a register.
    #[display("loadc")]
    LoadC,

    // Externals
    /// Copies an extern slot into a register as a raw word.
    #[display("eload")]
    ELoad,

    /// Copies a register into an extern slot as a raw word.
    #[display("estore")]
    EStore,

    // Stack frame stores
    /// Stores all 8 bytes of a register to the operand stack.
    #[display("sstore")]
    SStore,

    /// Stores the low 4 bytes of the unsigned register view.
    #[display("sstoreu32")]
    SStoreU32,

    /// Stores the low 2 bytes of the unsigned register view.
    #[display("sstoreu16")]
    SStoreU16,

    /// Stores the low byte of the unsigned register view.
    #[display("sstoreu8")]
    SStoreU8,

    /// Stores the low 4 bytes of the signed register view.
    #[display("sstorei32")]
    SStoreI32,

    /// Stores the low 2 bytes of the signed register view.
    #[display("sstorei16")]
    SStoreI16,

    /// Stores the low byte of the signed register view.
    #[display("sstorei8")]
    SStoreI8,

    /// Narrows the float register view to a single-precision float and
    /// stores its 4 bytes.
    #[display("sstoref32")]
    SStoreF32,

    // Stack frame loads
    /// Loads 8 bytes from the operand stack into a register.
    #[display("sload")]
    SLoad,

    /// Loads 4 bytes, zero-extending into the unsigned register view.
    #[display("sloadu32")]
    SLoadU32,

    /// Loads 2 bytes, zero-extending into the unsigned register view.
    #[display("sloadu16")]
    SLoadU16,

    /// Loads one byte, zero-extending into the unsigned register view.
    #[display("sloadu8")]
    SLoadU8,

    /// Loads 4 bytes, sign-extending into the signed register view.
    #[display("sloadi32")]
    SLoadI32,

    /// Loads 2 bytes, sign-extending into the signed register view.
    #[display("sloadi16")]
    SLoadI16,

    /// Loads one byte, sign-extending into the signed register view.
    #[display("sloadi8")]
    SLoadI8,

    /// Loads a single-precision float and widens it into the float register
    /// view.
    #[display("sloadf32")]
    SLoadF32,

    // Arithmetic
    /// Signed three-address addition.
    #[display("addi")]
    AddI,

    /// Unsigned three-address addition.
    #[display("addu")]
    AddU,

    /// Floating-point three-address addition.
    #[display("addf")]
    AddF,

    /// Signed three-address subtraction.
    #[display("subi")]
    SubI,

    /// Unsigned three-address subtraction.
    #[display("subu")]
    SubU,

    /// Floating-point three-address subtraction.
    #[display("subf")]
    SubF,

    /// Signed three-address multiplication.
    #[display("muli")]
    MulI,

    /// Unsigned three-address multiplication.
    #[display("mulu")]
    MulU,

    /// Floating-point three-address multiplication.
    #[display("mulf")]
    MulF,

    /// Signed three-address division.
    #[display("divi")]
    DivI,

    /// Unsigned three-address division.
    #[display("divu")]
    DivU,

    /// Floating-point three-address division.
    #[display("divf")]
    DivF,

    // Register manipulation
    /// Bitwise register-to-register copy.
    #[display("mov")]
    Mov,

    /// Converts the unsigned view of the source into the signed view of the
    /// destination.
    #[display("utoi")]
    UToI,

    /// Converts the unsigned view of the source into the float view of the
    /// destination.
    #[display("utof")]
    UToF,

    /// Converts the signed view of the source into the unsigned view of the
    /// destination.
    #[display("itou")]
    IToU,

    /// Converts the signed view of the source into the float view of the
    /// destination.
    #[display("itof")]
    IToF,

    /// Converts the float view of the source into the signed view of the
    /// destination.
    #[display("ftoi")]
    FToI,

    /// Converts the float view of the source into the unsigned view of the
    /// destination.
    #[display("ftou")]
    FToU,

    // Debug
    /// Prints the signed view of a register.
    #[display("printi")]
    PrintI,

    /// Prints the unsigned view of a register.
    #[display("printu")]
    PrintU,

    /// Prints the float view of a register.
    #[display("printf")]
    PrintF,

    /// Prints the NUL-terminated string whose address is held in the
    /// unsigned view of a register.
    #[display("prints")]
    PrintS,

    // Control flow
    /// Sets the comparison register to the signed difference between the
    /// second and the first operand.
    #[display("cmp")]
    Cmp,

    /// Unconditional jump to a label.
    #[display("jump")]
    Jump,

    /// Jumps to a label if the comparison register is zero.
    #[display("jeq")]
    Jeq,

    /// Jumps to a label if the comparison register is non-zero.
    #[display("jne")]
    Jne,

    // Execution
    /// Pushes a stack frame, reserves the label's stack allocation and jumps
    /// to the label.
    #[display("call")]
    Call,

    /// Invokes the native function bound to an extern slot. No frame is
    /// pushed: arguments are taken from registers 0..n-1 and the return
    /// value clobbers register 0.
    #[display("callext")]
    CallExt,

    /// Suspends execution, preserving the whole context for a later
    /// [`crate::Vm::resume`].
    #[display("yield")]
    Yield,

    /// Pops a stack frame, restoring the caller's register file bit for bit.
    /// With an empty call stack, terminates the run.
    #[display("ret")]
    Ret,
}

impl Instr {
    /// All instruction tags, in opcode order.
    pub const ALL: [Instr; 50] = [
        Instr::LoadC,
        Instr::ELoad,
        Instr::EStore,
        Instr::SStore,
        Instr::SStoreU32,
        Instr::SStoreU16,
        Instr::SStoreU8,
        Instr::SStoreI32,
        Instr::SStoreI16,
        Instr::SStoreI8,
        Instr::SStoreF32,
        Instr::SLoad,
        Instr::SLoadU32,
        Instr::SLoadU16,
        Instr::SLoadU8,
        Instr::SLoadI32,
        Instr::SLoadI16,
        Instr::SLoadI8,
        Instr::SLoadF32,
        Instr::AddI,
        Instr::AddU,
        Instr::AddF,
        Instr::SubI,
        Instr::SubU,
        Instr::SubF,
        Instr::MulI,
        Instr::MulU,
        Instr::MulF,
        Instr::DivI,
        Instr::DivU,
        Instr::DivF,
        Instr::Mov,
        Instr::UToI,
        Instr::UToF,
        Instr::IToU,
        Instr::IToF,
        Instr::FToI,
        Instr::FToU,
        Instr::PrintI,
        Instr::PrintU,
        Instr::PrintF,
        Instr::PrintS,
        Instr::Cmp,
        Instr::Jump,
        Instr::Jeq,
        Instr::Jne,
        Instr::Call,
        Instr::CallExt,
        Instr::Yield,
        Instr::Ret,
    ];

    /// Resolves an assembly mnemonic into an instruction tag.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Instr> {
        Some(match mnemonic {
            "loadc" => Instr::LoadC,

            "eload" => Instr::ELoad,
            "estore" => Instr::EStore,

            "sstore" => Instr::SStore,
            "sstoreu32" => Instr::SStoreU32,
            "sstoreu16" => Instr::SStoreU16,
            "sstoreu8" => Instr::SStoreU8,
            "sstorei32" => Instr::SStoreI32,
            "sstorei16" => Instr::SStoreI16,
            "sstorei8" => Instr::SStoreI8,
            "sstoref32" => Instr::SStoreF32,

            "sload" => Instr::SLoad,
            "sloadu32" => Instr::SLoadU32,
            "sloadu16" => Instr::SLoadU16,
            "sloadu8" => Instr::SLoadU8,
            "sloadi32" => Instr::SLoadI32,
            "sloadi16" => Instr::SLoadI16,
            "sloadi8" => Instr::SLoadI8,
            "sloadf32" => Instr::SLoadF32,

            "addi" => Instr::AddI,
            "addu" => Instr::AddU,
            "addf" => Instr::AddF,
            "subi" => Instr::SubI,
            "subu" => Instr::SubU,
            "subf" => Instr::SubF,
            "muli" => Instr::MulI,
            "mulu" => Instr::MulU,
            "mulf" => Instr::MulF,
            "divi" => Instr::DivI,
            "divu" => Instr::DivU,
            "divf" => Instr::DivF,

            "mov" => Instr::Mov,
            "utoi" => Instr::UToI,
            "utof" => Instr::UToF,
            "itou" => Instr::IToU,
            "itof" => Instr::IToF,
            "ftoi" => Instr::FToI,
            "ftou" => Instr::FToU,

            "printi" => Instr::PrintI,
            "printu" => Instr::PrintU,
            "printf" => Instr::PrintF,
            "prints" => Instr::PrintS,

            "cmp" => Instr::Cmp,
            "jump" => Instr::Jump,
            "jeq" => Instr::Jeq,
            "jne" => Instr::Jne,

            "call" => Instr::Call,
            "callext" => Instr::CallExt,
            "yield" => Instr::Yield,
            "ret" => Instr::Ret,

            _ => return None,
        })
    }

    /// Operand pattern decoded by the assembler for this instruction.
    pub fn operands(self) -> Operands {
        match self {
            Instr::LoadC => Operands::RegConst,

            Instr::ELoad | Instr::EStore => Operands::RegExtern,

            Instr::SStore
            | Instr::SStoreU32
            | Instr::SStoreU16
            | Instr::SStoreU8
            | Instr::SStoreI32
            | Instr::SStoreI16
            | Instr::SStoreI8
            | Instr::SStoreF32
            | Instr::SLoad
            | Instr::SLoadU32
            | Instr::SLoadU16
            | Instr::SLoadU8
            | Instr::SLoadI32
            | Instr::SLoadI16
            | Instr::SLoadI8
            | Instr::SLoadF32 => Operands::RegReg,

            Instr::AddI
            | Instr::AddU
            | Instr::AddF
            | Instr::SubI
            | Instr::SubU
            | Instr::SubF
            | Instr::MulI
            | Instr::MulU
            | Instr::MulF
            | Instr::DivI
            | Instr::DivU
            | Instr::DivF => Operands::RegRegReg,

            Instr::Mov
            | Instr::UToI
            | Instr::UToF
            | Instr::IToU
            | Instr::IToF
            | Instr::FToI
            | Instr::FToU
            | Instr::Cmp => Operands::RegReg,

            Instr::PrintI | Instr::PrintU | Instr::PrintF | Instr::PrintS => Operands::Reg,

            Instr::Jump | Instr::Jeq | Instr::Jne | Instr::Call => Operands::Label,

            Instr::CallExt => Operands::Extern,

            Instr::Yield | Instr::Ret => Operands::None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mnemonic_roundtrip() {
        for instr in Instr::ALL {
            assert_eq!(Instr::from_mnemonic(&instr.to_string()), Some(instr));
        }
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = std::collections::BTreeSet::new();
        for instr in Instr::ALL {
            assert!(seen.insert(instr.to_string()), "duplicate mnemonic for {instr:?}");
        }
        assert_eq!(seen.len(), Instr::ALL.len());
    }

    #[test]
    fn unknown_mnemonic() {
        assert_eq!(Instr::from_mnemonic("nop"), None);
        assert_eq!(Instr::from_mnemonic(""), None);
        assert_eq!(Instr::from_mnemonic("LOADC"), None);
    }

    #[test]
    fn branch_instructions_use_warg0() {
        for instr in [Instr::Jump, Instr::Jeq, Instr::Jne, Instr::Call] {
            assert_eq!(instr.operands(), Operands::Label);
        }
        assert_eq!(Instr::CallExt.operands(), Operands::Extern);
    }
}
