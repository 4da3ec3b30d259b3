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

//! Execution context interpreting a program image.

use std::ffi::CStr;
use std::io;

use tracing::{debug, trace};

use crate::core::{CoreRegs, Word};
use crate::isa::{Instr, Opcode};
use crate::program::{LabelId, Program};

/// Initial reservation for the operand byte-stack.
const STACK_RESERVE: usize = 4096;

/// Errors launching program execution.
///
/// Runtime conditions past a successful launch (division by zero,
/// out-of-bounds operand-stack access, `prints`/`callext` on a bad slot)
/// are not recoverable errors: they follow host semantics and panic.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ExecError {
    /// unknown label `{0}`
    UnknownLabel(String),
}

/// Way in which a run came to a stop.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum Halt {
    /// The call stack drained, or the program counter ran off the end of
    /// the code segment.
    #[display("finished")]
    Finished,

    /// A `yield` instruction suspended the context; [`Vm::resume`]
    /// continues at the following instruction.
    #[display("yielded")]
    Yielded,
}

/// Interpreter movement after executing an instruction.
enum ExecStep {
    /// Proceed to the next instruction.
    Next,

    /// Suspend the run, preserving the whole context.
    Yield,

    /// Terminate the run.
    Stop,
}

/// Stack frame saved by `call` and restored by `ret`.
struct Frame {
    /// Caller register file, including `sp`: restoring it releases the
    /// callee's operand-stack region.
    state: CoreRegs,

    /// Label the frame was called into.
    label: LabelId,
}

/// Execution context: one logical coroutine running over a program image.
///
/// The context owns the register file, the operand byte-stack and the call
/// stack; the program image is borrowed and stays read-only except for its
/// extern slots. Between a `yield` and the following [`Vm::resume`] the
/// whole machine state is preserved, which makes the context itself the
/// coroutine itself; no host-side scheduling machinery is required beyond calling
/// `resume`.
///
/// The `print*` instructions write to stdout unless the context was created
/// with [`Vm::with_output`].
pub struct Vm<'run> {
    program: &'run Program,
    regs: CoreRegs,
    stack: Vec<u8>,
    call_stack: Vec<Frame>,
    output: Option<&'run mut dyn io::Write>,
    did_yield: bool,
}

impl<'run> Vm<'run> {
    /// Constructs an execution context over a loaded program image.
    pub fn new(program: &'run Program) -> Vm<'run> {
        Vm {
            program,
            regs: CoreRegs::new(),
            stack: Vec::with_capacity(STACK_RESERVE),
            call_stack: vec![],
            output: None,
            did_yield: false,
        }
    }

    /// Constructs an execution context sending `print*` output into the
    /// given writer instead of stdout.
    pub fn with_output(program: &'run Program, output: &'run mut dyn io::Write) -> Vm<'run> {
        Vm { output: Some(output), ..Vm::new(program) }
    }

    /// Current state of the register file.
    #[inline]
    pub fn registers(&self) -> &CoreRegs { &self.regs }

    /// Mutable access to the register file, letting the host preload
    /// argument registers before a run.
    #[inline]
    pub fn registers_mut(&mut self) -> &mut CoreRegs { &mut self.regs }

    /// Whether the most recent run stopped at a `yield`.
    #[inline]
    pub fn did_yield(&self) -> bool { self.did_yield }

    /// Calls into the given entry label and interprets the program until it
    /// terminates or yields.
    pub fn run_from(&mut self, label: &str) -> Result<Halt, ExecError> {
        let Some(id) = self.program.label_id(label) else {
            return Err(ExecError::UnknownLabel(label.to_owned()));
        };
        debug!("running from label `{label}`");
        self.call(id);
        // counter the -1 applied by the jump inside `call`
        self.regs.pc = self.regs.pc.wrapping_add(1);
        Ok(self.run())
    }

    /// Re-enters the dispatch loop after a `yield`; execution continues at
    /// the instruction following the yield point. After a natural
    /// termination this is a no-op returning [`Halt::Finished`].
    pub fn resume(&mut self) -> Halt {
        if !self.did_yield {
            return Halt::Finished;
        }
        debug!("resuming from pc {}", self.regs.pc);
        self.run()
    }

    fn run(&mut self) -> Halt {
        self.did_yield = false;
        let end = self.program.opcodes.len() as u32;
        let mut should_run = true;
        while should_run && self.regs.pc < end {
            let opcode = self.program.opcodes[self.regs.pc as usize];
            trace!("@{:04}: {opcode}", self.regs.pc);
            match self.step(opcode) {
                ExecStep::Next => {}
                ExecStep::Yield => {
                    self.did_yield = true;
                    should_run = false;
                }
                ExecStep::Stop => should_run = false,
            }
            // Unconditional post-increment; branch handlers compensate by
            // targeting `label.pc - 1`.
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
        if self.did_yield {
            Halt::Yielded
        } else {
            Halt::Finished
        }
    }

    /// Pushes a stack frame saving the complete register file, jumps to the
    /// label and reserves its operand-stack allocation.
    ///
    /// Allocations are sequential: a frame's region starts at the current
    /// stack length, so nested calls always receive fresh, disjoint
    /// regions, released together with the frame by the `sp` rewind on
    /// `ret`.
    fn call(&mut self, id: LabelId) {
        self.call_stack.push(Frame { state: self.regs.clone(), label: id });
        self.jump(id);
        let label = self.program.label(id);
        if label.stackalloc > 0 {
            let sp = self.stack.len() as u32;
            self.stack.resize(sp as usize + label.stackalloc as usize, 0);
            self.regs.sp = sp;
        }
    }

    fn jump(&mut self, id: LabelId) {
        // -1 compensates the post-increment of the dispatch loop
        self.regs.pc = self.program.label(id).pc.wrapping_sub(1);
    }

    fn write_line(&mut self, args: std::fmt::Arguments) {
        match &mut self.output {
            Some(writer) => {
                let _ = writer.write_fmt(args);
                let _ = writer.write_all(b"\n");
            }
            None => println!("{args}"),
        }
    }

    fn stack_write(&mut self, offset: usize, bytes: &[u8]) {
        self.stack[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn stack_read<const LEN: usize>(&self, offset: usize) -> [u8; LEN] {
        let mut bytes = [0u8; LEN];
        bytes.copy_from_slice(&self.stack[offset..offset + LEN]);
        bytes
    }

    fn step(&mut self, opcode: Opcode) -> ExecStep {
        match opcode.instr {
            Instr::LoadC => {
                self.regs[opcode.reg0()] = self.program.constants[opcode.arg1 as usize].value;
            }

            Instr::ELoad => {
                self.regs[opcode.reg0()] = self.program.extern_word(opcode.arg1 as u32);
            }
            Instr::EStore => {
                self.program.set_extern_word(opcode.arg1 as u32, self.regs[opcode.reg0()]);
            }

            Instr::SStore => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = self.regs[opcode.reg0()].u().to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreU32 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].u() as u32).to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreU16 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].u() as u16).to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreU8 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].u() as u8).to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreI32 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].i() as i32).to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreI16 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].i() as i16).to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreI8 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].i() as i8).to_le_bytes();
                self.stack_write(offset, &bytes);
            }
            Instr::SStoreF32 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let bytes = (self.regs[opcode.reg0()].f() as f32).to_le_bytes();
                self.stack_write(offset, &bytes);
            }

            Instr::SLoad => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = u64::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value);
            }
            Instr::SLoadU32 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = u32::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as u64);
            }
            Instr::SLoadU16 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = u16::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as u64);
            }
            Instr::SLoadU8 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = u8::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as u64);
            }
            Instr::SLoadI32 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = i32::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as i64);
            }
            Instr::SLoadI16 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = i16::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as i64);
            }
            Instr::SLoadI8 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = i8::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as i64);
            }
            Instr::SLoadF32 => {
                let offset = self.regs[opcode.reg1()].u() as usize;
                let value = f32::from_le_bytes(self.stack_read(offset));
                self.regs[opcode.reg0()] = Word::from(value as f64);
            }

            Instr::AddI => self.arith(opcode, |a, b| Word::from(a.i().wrapping_add(b.i()))),
            Instr::AddU => self.arith(opcode, |a, b| Word::from(a.u().wrapping_add(b.u()))),
            Instr::AddF => self.arith(opcode, |a, b| Word::from(a.f() + b.f())),
            Instr::SubI => self.arith(opcode, |a, b| Word::from(a.i().wrapping_sub(b.i()))),
            Instr::SubU => self.arith(opcode, |a, b| Word::from(a.u().wrapping_sub(b.u()))),
            Instr::SubF => self.arith(opcode, |a, b| Word::from(a.f() - b.f())),
            Instr::MulI => self.arith(opcode, |a, b| Word::from(a.i().wrapping_mul(b.i()))),
            Instr::MulU => self.arith(opcode, |a, b| Word::from(a.u().wrapping_mul(b.u()))),
            Instr::MulF => self.arith(opcode, |a, b| Word::from(a.f() * b.f())),
            Instr::DivI => self.arith(opcode, |a, b| Word::from(a.i() / b.i())),
            Instr::DivU => self.arith(opcode, |a, b| Word::from(a.u() / b.u())),
            Instr::DivF => self.arith(opcode, |a, b| Word::from(a.f() / b.f())),

            Instr::Mov => self.regs[opcode.reg0()] = self.regs[opcode.reg1()],
            Instr::UToI => {
                self.regs[opcode.reg0()] = Word::from(self.regs[opcode.reg1()].u() as i64)
            }
            Instr::UToF => {
                self.regs[opcode.reg0()] = Word::from(self.regs[opcode.reg1()].u() as f64)
            }
            Instr::IToU => {
                self.regs[opcode.reg0()] = Word::from(self.regs[opcode.reg1()].i() as u64)
            }
            Instr::IToF => {
                self.regs[opcode.reg0()] = Word::from(self.regs[opcode.reg1()].i() as f64)
            }
            Instr::FToI => {
                self.regs[opcode.reg0()] = Word::from(self.regs[opcode.reg1()].f() as i64)
            }
            Instr::FToU => {
                self.regs[opcode.reg0()] = Word::from(self.regs[opcode.reg1()].f() as u64)
            }

            Instr::PrintI => {
                let value = self.regs[opcode.reg0()].i();
                self.write_line(format_args!("{value}"));
            }
            Instr::PrintU => {
                let value = self.regs[opcode.reg0()].u();
                self.write_line(format_args!("{value}"));
            }
            Instr::PrintF => {
                let value = self.regs[opcode.reg0()].f();
                self.write_line(format_args!("{value:.6}"));
            }
            Instr::PrintS => {
                let ptr = self.regs[opcode.reg0()].u() as *const std::ffi::c_char;
                // Safety: the pointer is either a string constant fixed up to
                // the program's own data segment, where the interner
                // guarantees NUL termination, or was placed into the register
                // by the host, whose contract is to pass a valid C string.
                let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes();
                let text = String::from_utf8_lossy(bytes).into_owned();
                self.write_line(format_args!("{text}"));
            }

            Instr::Cmp => {
                self.regs.cmp =
                    self.regs[opcode.reg1()].i().wrapping_sub(self.regs[opcode.reg0()].i());
            }
            Instr::Jump => self.jump(LabelId(opcode.warg0)),
            Instr::Jeq => {
                if self.regs.cmp == 0 {
                    self.jump(LabelId(opcode.warg0));
                }
            }
            Instr::Jne => {
                if self.regs.cmp != 0 {
                    self.jump(LabelId(opcode.warg0));
                }
            }

            Instr::Call => self.call(LabelId(opcode.warg0)),
            Instr::CallExt => {
                let id = opcode.warg0 as usize;
                match self.program.natives[id].as_ref() {
                    Some(native) => native(&mut self.regs),
                    None => {
                        panic!("callext invoked extern slot #{id} with no bound host function")
                    }
                }
            }
            Instr::Yield => return ExecStep::Yield,
            Instr::Ret => {
                let Some(frame) = self.call_stack.pop() else {
                    panic!("return with an empty call stack")
                };
                trace!(
                    "returning from `{}`",
                    self.program.label_name(self.program.label(frame.label))
                );
                self.regs = frame.state;
                if self.call_stack.is_empty() {
                    return ExecStep::Stop;
                }
            }
        }
        ExecStep::Next
    }

    fn arith(&mut self, opcode: Opcode, op: impl Fn(Word, Word) -> Word) {
        self.regs[opcode.reg0()] = op(self.regs[opcode.reg1()], self.regs[opcode.reg2()]);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn run(source: &str) -> (Vec<u8>, Halt) {
        let program = Program::assemble(source).unwrap();
        let mut output = Vec::new();
        let halt = Vm::with_output(&program, &mut output).run_from("main").unwrap();
        (output, halt)
    }

    #[test]
    fn empty_program_terminates() {
        let program = Program::assemble(".main").unwrap();
        let mut vm = Vm::new(&program);
        assert_eq!(vm.run_from("main").unwrap(), Halt::Finished);
        assert!(!vm.did_yield());
    }

    #[test]
    fn unknown_entry_label() {
        let program = Program::assemble(".main ret").unwrap();
        let mut vm = Vm::new(&program);
        assert!(matches!(
            vm.run_from("start"),
            Err(ExecError::UnknownLabel(name)) if name == "start"
        ));
    }

    #[test]
    fn conversion_roundtrips() {
        let (output, _) = run(
            "
            $x u7
            .main
                loadc r0 $x
                utoi r1 r0
                itou r2 r1
                printu r2
                itof r3 r1
                ftoi r4 r3
                printi r4
                ret
            ",
        );
        assert_eq!(output, b"7\n7\n");
    }

    #[test]
    fn cmp_is_order_sensitive() {
        let (output, _) = run(
            "
            $small i3
            $big i10
            .main
                loadc r0 $small
                loadc r1 $big
                cmp r0 r1
                jne .taken
                printi r0
                ret
            .taken
                printi r1
                ret
            ",
        );
        // cmp = r1.i - r0.i = 7, so jne is taken
        assert_eq!(output, b"10\n");
    }

    #[test]
    fn nested_stack_allocations_are_disjoint() {
        // the outer frame occupies stack bytes 0..8, the nested one 8..16;
        // writes through the inner region must not clobber the outer value
        let (output, _) = run(
            "
            .main
                call .outer
                ret
            .outer 8
                loadc r0 u77
                loadc r1 u0
                sstore r0 r1
                call .inner
                loadc r1 u0
                sload r2 r1
                printu r2
                ret
            .inner 8
                loadc r0 u88
                loadc r1 u8
                sstore r0 r1
                ret
            ",
        );
        assert_eq!(output, b"77\n");
    }

    #[test]
    fn resume_after_finish_is_noop() {
        let program = Program::assemble(".main printi r0 ret").unwrap();
        let mut output = Vec::new();
        let mut vm = Vm::with_output(&program, &mut output);
        assert_eq!(vm.run_from("main").unwrap(), Halt::Finished);
        assert_eq!(vm.resume(), Halt::Finished);
        assert_eq!(vm.resume(), Halt::Finished);
        drop(vm);
        assert_eq!(output, b"0\n");
    }

    #[test]
    fn float_prints_use_fixed_precision() {
        let (output, _) = run(
            "
            $pi f3.5
            .main
                loadc r0 $pi
                printf r0
                ret
            ",
        );
        assert_eq!(output, b"3.500000\n");
    }
}
