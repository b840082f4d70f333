use thiserror::Error;

/// What went wrong.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("stack underflow: needed {needed} value(s), had {available}")]
    StackUnderflow { needed: usize, available: usize },

    /// Unknown tag in a raw tape, or an instruction whose operand does not
    /// resolve.
    #[error("unknown opcode at {pc}: {detail}")]
    UnknownOpcode { pc: usize, detail: String },

    #[error("unknown program '{0}'")]
    UnknownProgram(String),

    #[error("program '{0}' is already registered")]
    DuplicateProgram(String),

    #[error("key {0:?} already exists in this object")]
    KeyCollision(String),

    #[error("path '{path}' not found: {reason}")]
    PathNotFound { path: String, reason: String },

    #[error("document nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("index {index} out of range for container of size {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("stack size limit exceeded ({limit})")]
    StackOverflow { limit: usize },

    #[error("execution step limit exceeded ({limit})")]
    StepLimitExceeded { limit: usize },

    #[error("call depth limit exceeded ({limit}) in '{program}'")]
    CallDepthExceeded { limit: usize, program: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    /// `program@pc` frames, innermost first.
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> Self {
        RuntimeError {
            kind,
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.call_stack.push(context.into());
        self
    }
}

impl From<ErrorKind> for RuntimeError {
    fn from(kind: ErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeError::new(ErrorKind::Io(err))
    }
}

pub fn type_error(expected: &str, found: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

pub fn stack_underflow(needed: usize, available: usize) -> RuntimeError {
    RuntimeError::new(ErrorKind::StackUnderflow { needed, available })
}

pub fn index_out_of_bounds(index: usize, len: usize) -> RuntimeError {
    RuntimeError::new(ErrorKind::IndexOutOfRange { index, len })
}

pub fn unknown_opcode(pc: usize, detail: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::UnknownOpcode {
        pc,
        detail: detail.into(),
    })
}

pub fn unknown_program(name: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::UnknownProgram(name.to_string()))
}

pub fn path_not_found(path: &str, reason: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::PathNotFound {
        path: path.to_string(),
        reason: reason.into(),
    })
}
