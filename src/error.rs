use std::error::Error;
use std::fmt;

/// Outcome of `Vm::interpret`. The driver maps this to a process exit code
/// (Ok -> 0, CompileError -> 65, RuntimeError -> 70).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// A single compile-time diagnostic: `[line N] Error at '<lexeme>': <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub at: String,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.at.is_empty() {
            write!(f, "[line {}] Error: {}", self.line, self.message)
        } else {
            write!(
                f,
                "[line {}] Error at '{}': {}",
                self.line, self.at, self.message
            )
        }
    }
}

impl Error for CompileError {}

/// A runtime fault: a message plus the call-stack trace captured at the
/// point of failure, innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: u32,
    pub function_name: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in &self.trace {
            writeln!(f, "[line {}] in {}", frame.line, frame.function_name)?;
        }
        Ok(())
    }
}

impl Error for RuntimeError {}
