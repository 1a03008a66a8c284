//! The three error kinds from the error-handling design: scan/compile
//! errors (reported during compilation, never surfaced to a caller as a
//! `Result` value — they're printed through the sink as they're found),
//! runtime errors (composed once, with a line and a stack trace), and
//! host errors (I/O, out-of-memory).

use std::fmt;

use thiserror::Error;

/// What `Vm::interpret` returns, independent of the errors' own textual
/// content (which has already been sent to the sink by the time this is
/// produced) — this is purely what the CLI needs to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
  Ok,
  CompileError,
  RuntimeError,
}

/// A single stack frame in a runtime error's trace.
pub struct TraceFrame {
  pub line: u32,
  /// `None` for the top-level script frame.
  pub function_name: Option<String>,
}

impl fmt::Display for TraceFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.function_name {
      Some(name) => write!(f, "[line {}] in {}()", self.line, name),
      None => write!(f, "[line {}] in script", self.line),
    }
  }
}

/// A runtime error: the line it was raised at, its message, and the call
/// stack at the moment it was raised (innermost frame first).
pub struct RuntimeError {
  pub line: u32,
  pub message: String,
  pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[line {}] - {}", self.line, self.message)?;
    for frame in &self.trace {
      write!(f, "\n{frame}")?;
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum HostError {
  #[error("could not read script {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}
