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

//! Command-line runner: assembles a source file and executes it from its
//! `main` label.
//!
//! Exit codes: 0 on success, 1 when no input file is given, 2 on a load
//! failure, 3 on a runtime failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use minivm::{Program, Vm};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "minivm-run")]
#[command(author, version, about = "Assemble and run a MiniVM assembly file")]
struct Cli {
    /// Path to the assembly source file
    file: Option<PathBuf>,

    /// Label to start execution from
    #[arg(long, default_value = "main")]
    entry: String,

    /// Print the disassembled program image before running it
    #[arg(long)]
    disassemble: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let Some(file) = cli.file else {
        error!("no input file specified");
        return ExitCode::from(1);
    };

    let program = match Program::assemble_file(&file) {
        Ok(program) => program,
        Err(err) => {
            error!("failed to load assembly from {}: {err}", file.display());
            return ExitCode::from(2);
        }
    };

    if cli.disassemble {
        if let Err(err) = program.disassemble(std::io::stderr()) {
            error!("unable to print disassembly: {err}");
        }
    }

    let mut vm = Vm::new(&program);
    if let Err(err) = vm.run_from(&cli.entry) {
        error!("execution failed: {err}");
        return ExitCode::from(3);
    }
    // a standalone program has nobody else to wait for, so drive every
    // yield point to completion
    while vm.did_yield() {
        vm.resume();
    }

    ExitCode::SUCCESS
}
