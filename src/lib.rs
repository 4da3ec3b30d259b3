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

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    // missing_docs
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Rust implementation of MiniVM: a minimal register-based virtual machine
//! and an assembler turning its line-oriented assembly dialect into an
//! executable program image.
//!
//! MiniVM is built from two tightly coupled subsystems:
//! * the [`asm`] module assembles source text into a [`Program`]: a packed
//!   opcode stream, a constant pool with interned strings, a label table and
//!   an extern table;
//! * the [`Vm`] execution context interprets that image against a file of 16
//!   64-bit registers, a byte-addressed operand stack and a call stack.
//!
//! ## Design
//!
//! * A register [`Word`] is a polymorphic 64-bit cell read as a signed
//!   integer, an unsigned integer or an IEEE-754 double, depending on the
//!   instruction; pointers travel as unsigned integers.
//! * The instruction set is closed (see [`isa::Instr`]): there are no
//!   reserved or dynamically extensible opcodes.
//! * Execution is strictly single-threaded and cooperative. A program
//!   suspends itself with `yield`; the host continues it with
//!   [`Vm::resume`]. The execution context *is* the coroutine state; no
//!   host-language coroutine is involved.
//! * Host integration happens through named extern slots declared in
//!   assembly with `@name`. A slot is a plain data word the host may read
//!   and write between runs, or the seat of a native function invoked by
//!   `callext` (see [`program::NativeFunction`]).
//!
//! ## Example
//!
//! ```
//! use minivm::{Program, Vm};
//!
//! let program = Program::assemble(
//!     r"
//!     $a i40
//!     $b i2
//!     .main
//!         loadc r0 $a
//!         loadc r1 $b
//!         addi r2 r0 r1
//!         printi r2
//!         ret
//!     ",
//! )
//! .unwrap();
//!
//! let mut output = Vec::new();
//! Vm::with_output(&program, &mut output).run_from("main").unwrap();
//! assert_eq!(output, b"42\n");
//! ```

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;

pub mod asm;
pub mod core;
pub mod isa;
pub mod program;
mod vm;

pub use crate::asm::AssembleError;
pub use crate::core::{CoreRegs, ParseRegError, Reg, Word, REG_COUNT};
pub use crate::program::{BindError, NativeFn, Program};
pub use crate::vm::{ExecError, Halt, Vm};
