//! Embeddable bytecode VM for walking and editing JSON-like documents.
//!
//! A [`Vm`] owns one [`Document`] and a table of named programs. Programs
//! are flat tapes of [`Instruction`]s plus a literal pool; they drive a tree
//! cursor ([`Explorer`]) over the document and an operand stack of
//! [`Value`]s.
//!
//! ```ignore
//! let mut vm = Vm::new(Value::from(serde_json::json!({ "a": 1 })));
//! let mut b = ProgramBuilder::new();
//! b.int(10).int(20).op(Instruction::Add).op(Instruction::Print);
//! vm.register_program("main", b.build())?;
//! vm.run("main")?;
//! ```

pub mod bytecode;
pub mod config;
pub mod lang;
pub mod runtime;

pub use bytecode::{
    Instruction, LiteralIndex, LiteralPool, Program, ProgramBuilder, Tape, TapeOffset,
};
pub use config::{ConfigError, VmConfig};
pub use lang::{Document, Node, NodeId, Value};
pub use runtime::{ErrorKind, Explorer, ProgramTable, RuntimeError, Vm};
