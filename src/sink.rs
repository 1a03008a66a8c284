//! The logging facility is an external collaborator: a sink that receives
//! already-formatted diagnostic text. The library never writes to a
//! stream directly; it goes through this trait so an embedder can
//! redirect it.

use std::fmt;
use std::io::Write;

pub trait DiagnosticSink {
  fn error(&mut self, args: fmt::Arguments<'_>);
  fn info(&mut self, args: fmt::Arguments<'_>);
  fn debug(&mut self, args: fmt::Arguments<'_>);
}

/// Tag-and-format to stderr: `"{tag}: {message}\n"`.
#[derive(Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
  fn error(&mut self, args: fmt::Arguments<'_>) {
    let _ = writeln!(std::io::stderr(), "error: {args}");
  }

  fn info(&mut self, args: fmt::Arguments<'_>) {
    let _ = writeln!(std::io::stderr(), "info: {args}");
  }

  fn debug(&mut self, args: fmt::Arguments<'_>) {
    let _ = writeln!(std::io::stderr(), "debug: {args}");
  }
}

/// Captures everything written to it, for tests that assert on diagnostic
/// output without touching real stderr.
#[derive(Default)]
pub struct BufferSink {
  pub lines: Vec<String>,
}

impl DiagnosticSink for BufferSink {
  fn error(&mut self, args: fmt::Arguments<'_>) {
    self.lines.push(format!("error: {args}"));
  }

  fn info(&mut self, args: fmt::Arguments<'_>) {
    self.lines.push(format!("info: {args}"));
  }

  fn debug(&mut self, args: fmt::Arguments<'_>) {
    self.lines.push(format!("debug: {args}"));
  }
}
