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

//! End-to-end execution scenarios.

use minivm::{Halt, Program, Vm};

fn run(source: &str) -> Vec<u8> {
    let program = Program::assemble(source).unwrap();
    let mut output = Vec::new();
    let halt = Vm::with_output(&program, &mut output).run_from("main").unwrap();
    assert_eq!(halt, Halt::Finished);
    output
}

#[test]
fn arithmetic_and_print() {
    let output = run(
        "
        $a i40
        $b i2
        .main
            loadc r0 $a
            loadc r1 $b
            addi r2 r0 r1
            printi r2
            ret
        ",
    );
    assert_eq!(output, b"42\n");
}

#[test]
fn branch_on_compare() {
    let output = run(
        "
        $x i5
        $y i5
        .main
            loadc r0 $x
            loadc r1 $y
            cmp r0 r1
            jeq .eq
            loadc r2 $x
            printi r2
            ret
        .eq
            loadc r3 $y
            printi r3
            ret
        ",
    );
    assert_eq!(output, b"5\n");
}

#[test]
fn call_preserves_caller_registers() {
    let output = run(
        "
        .main
            loadc r0 u123456789
            call .callee
            printu r0
            ret
        .callee 8
            loadc r0 u55
            loadc r1 u0
            sstore r0 r1
            sload r2 r1
            printu r2
            ret
        ",
    );
    assert_eq!(output, b"55\n123456789\n");
}

#[test]
fn register_file_restored_bit_for_bit() {
    let program = Program::assemble(
        "
        $float f1.25
        .main
            loadc r0 u111
            loadc r5 $float
            call .sub
            yield
            ret
        .sub 16
            loadc r0 u999
            loadc r5 u888
            ret
        ",
    )
    .unwrap();

    let mut vm = Vm::new(&program);
    assert_eq!(vm.run_from("main").unwrap(), Halt::Yielded);
    assert_eq!(vm.registers().r[0].u(), 111);
    assert_eq!(vm.registers().r[5].f(), 1.25);
    assert_eq!(vm.registers().sp, 0);
    assert_eq!(vm.resume(), Halt::Finished);
}

#[test]
fn yield_and_resume() {
    let program = Program::assemble(
        "
        .main
            loadc r0 i1
            printi r0
            yield
            loadc r0 i2
            printi r0
            ret
        ",
    )
    .unwrap();

    let mut output = Vec::new();
    let mut vm = Vm::with_output(&program, &mut output);

    assert_eq!(vm.run_from("main").unwrap(), Halt::Yielded);
    assert!(vm.did_yield());

    assert_eq!(vm.resume(), Halt::Finished);
    assert!(!vm.did_yield());

    drop(vm);
    assert_eq!(output, b"1\n2\n");
}

#[test]
fn stackalloc_zero_keeps_sp() {
    let program = Program::assemble(
        "
        .main
            call .nosp
            ret
        .nosp
            yield
            ret
        ",
    )
    .unwrap();

    let mut vm = Vm::new(&program);
    assert_eq!(vm.run_from("main").unwrap(), Halt::Yielded);
    assert_eq!(vm.registers().sp, 0);
    assert_eq!(vm.resume(), Halt::Finished);
}

#[test]
fn byte_store_widths() {
    let output = run(
        "
        .main
            call .sub
            ret
        .sub 8
            loadc r0 u511
            loadc r1 u3
            sstoreu8 r0 r1
            sloadu8 r2 r1
            printu r2
            sloadi8 r3 r1
            printi r3
            ret
        ",
    );
    // one byte stored: 511 truncates to 0xFF; unsigned load zero-extends,
    // signed load sign-extends
    assert_eq!(output, b"255\n-1\n");
}

#[test]
fn typed_stack_roundtrips() {
    let output = run(
        "
        $pi f3.25
        .main
            call .sub
            ret
        .sub 32
            loadc r0 $pi
            loadc r1 u0
            sstoref32 r0 r1
            sloadf32 r2 r1
            printf r2

            loadc r0 i-70000
            loadc r1 u8
            sstorei32 r0 r1
            sloadi32 r3 r1
            printi r3

            loadc r0 u65535
            loadc r1 u16
            sstoreu16 r0 r1
            sloadu16 r4 r1
            printu r4

            sloadi16 r5 r1
            printi r5
            ret
        ",
    );
    assert_eq!(output, b"3.250000\n-70000\n65535\n-1\n");
}

#[test]
fn mov_copies_bitwise() {
    let program = Program::assemble(
        "
        $value f6.5
        .main
            loadc r0 $value
            mov r1 r0
            yield
            ret
        ",
    )
    .unwrap();

    let mut vm = Vm::new(&program);
    assert_eq!(vm.run_from("main").unwrap(), Halt::Yielded);
    assert_eq!(vm.registers().r[0], vm.registers().r[1]);
    assert_eq!(vm.registers().r[1].f(), 6.5);
    assert_eq!(vm.resume(), Halt::Finished);
}

#[test]
fn prints_interned_string() {
    let output = run(
        r#"
        $greeting "hello\nworld"
        .main
            loadc r0 $greeting
            prints r0
            ret
        "#,
    );
    assert_eq!(output, b"hello\nworld\n");
}

#[test]
fn prints_inline_literal() {
    let output = run(
        r#"
        .main
            loadc r0 "inline"
            prints r0
            ret
        "#,
    );
    assert_eq!(output, b"inline\n");
}

#[test]
fn unsigned_division() {
    let output = run(
        "
        .main
            loadc r0 u84
            loadc r1 u2
            divu r2 r0 r1
            printu r2
            ret
        ",
    );
    assert_eq!(output, b"42\n");
}

#[test]
fn float_arithmetic() {
    let output = run(
        "
        $a f1.5
        $b f0.25
        .main
            loadc r0 $a
            loadc r1 $b
            subf r2 r0 r1
            printf r2
            mulf r3 r0 r1
            printf r3
            divf r4 r0 r1
            printf r4
            ret
        ",
    );
    assert_eq!(output, b"1.250000\n0.375000\n6.000000\n");
}

#[test]
fn jump_skips_forward() {
    let output = run(
        "
        .main
            jump .after
            loadc r0 u1
            printu r0
        .after
            loadc r0 u2
            printu r0
            ret
        ",
    );
    assert_eq!(output, b"2\n");
}

#[test]
fn jne_falls_through_on_equal() {
    let output = run(
        "
        $x i9
        .main
            loadc r0 $x
            loadc r1 $x
            cmp r0 r1
            jne .other
            printi r0
            ret
        .other
            loadc r2 u0
            printu r2
            ret
        ",
    );
    assert_eq!(output, b"9\n");
}

#[test]
fn deep_call_chain() {
    let output = run(
        "
        .main
            loadc r7 u1
            call .first
            printu r7
            ret
        .first 8
            loadc r7 u2
            call .second
            printu r7
            ret
        .second 8
            loadc r7 u3
            call .third
            printu r7
            ret
        .third
            printu r7
            ret
        ",
    );
    // the innermost frame sees the latest value; every return restores the
    // caller's register file
    assert_eq!(output, b"3\n3\n2\n1\n");
}

#[test]
fn context_can_run_again() {
    let program = Program::assemble(
        "
        .main
            loadc r0 u5
            printu r0
            ret
        ",
    )
    .unwrap();

    let mut output = Vec::new();
    let mut vm = Vm::with_output(&program, &mut output);
    assert_eq!(vm.run_from("main").unwrap(), Halt::Finished);
    assert_eq!(vm.run_from("main").unwrap(), Halt::Finished);
    drop(vm);
    assert_eq!(output, b"5\n5\n");
}

#[test]
fn backward_jump_loops() {
    let output = run(
        "
        $one u1
        $limit u3
        .main
            loadc r0 u0
            loadc r1 $one
            loadc r2 $limit
        .again
            addu r0 r0 r1
            printu r0
            cmp r0 r2
            jne .again
            ret
        ",
    );
    assert_eq!(output, b"1\n2\n3\n");
}
