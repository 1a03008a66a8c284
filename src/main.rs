use std::fs;
use std::io::Read;
use std::process::ExitCode;

use corvid::{HostError, InterpretResult, StderrSink, Vm};

const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

fn main() -> ExitCode {
  let args: Vec<String> = std::env::args().skip(1).collect();
  match args.as_slice() {
    [] => run_repl(),
    [path] => run_file(path),
    _ => {
      eprintln!("Usage: corvid [script]");
      ExitCode::from(EX_USAGE)
    }
  }
}

fn run_file(path: &str) -> ExitCode {
  let source = match read_source(path) {
    Ok(s) => s,
    Err(err) => {
      eprintln!("error: {err}");
      return ExitCode::from(EX_IOERR);
    }
  };

  let mut vm = Vm::new(Box::new(StderrSink));
  match vm.interpret(&source) {
    InterpretResult::Ok => ExitCode::SUCCESS,
    InterpretResult::CompileError => ExitCode::from(EX_DATAERR),
    InterpretResult::RuntimeError => ExitCode::from(EX_SOFTWARE),
  }
}

fn read_source(path: &str) -> Result<String, HostError> {
  let mut file = fs::File::open(path).map_err(|source| HostError::Io {
    path: path.to_string(),
    source,
  })?;
  let mut source = String::new();
  file
    .read_to_string(&mut source)
    .map_err(|source| HostError::Io {
      path: path.to_string(),
      source,
    })?;
  Ok(source)
}

fn run_repl() -> ExitCode {
  let mut vm = Vm::new(Box::new(StderrSink));
  let mut editor = rustyline::Editor::<()>::new().expect("failed to initialize line editor");
  loop {
    match editor.readline(">> ") {
      Ok(line) => {
        editor.add_history_entry(line.as_str());
        vm.interpret(&line);
      }
      Err(rustyline::error::ReadlineError::Interrupted)
      | Err(rustyline::error::ReadlineError::Eof) => break,
      Err(rustyline::error::ReadlineError::WindowResized) => continue,
      Err(err) => {
        eprintln!("error: {err}");
        break;
      }
    }
  }
  ExitCode::SUCCESS
}
