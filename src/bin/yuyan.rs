extern crate yuyan;

use std::io::{self, Write};

use clap::Parser;
use yuyan::{InterpretResult, Vm};

/// The Yuyan (语言) bytecode interpreter: runs a source file, or drops into
/// a REPL when no file is given.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a Yuyan source file. Omit to start a REPL.
    file: Option<std::path::PathBuf>,
}

fn main() {
    simple_logger::init_with_level(log::Level::Warn).unwrap();
    let args = Cli::parse();

    let exit_code = match args.file {
        Some(path) => run_file(&path),
        None => run_repl(),
    };
    std::process::exit(exit_code);
}

fn run_file(path: &std::path::Path) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            log::error!("无法读取文件 '{}': {err}", path.display());
            return 74;
        }
    };

    let mut vm = Vm::new();
    exit_code_for(vm.interpret(&source))
}

fn run_repl() -> i32 {
    let mut vm = Vm::new();
    let mut line = String::new();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return 0;
        }
        line.clear();
        match io::stdin().read_line(&mut line) {
            Ok(0) => return 0,
            Ok(_) => {
                vm.interpret(&line);
            }
            Err(err) => {
                log::error!("读取标准输入失败: {err}");
                return 74;
            }
        }
    }
}

fn exit_code_for(result: InterpretResult) -> i32 {
    match result {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 65,
        InterpretResult::RuntimeError => 70,
    }
}
