pub mod builder;
pub mod cell;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod verify;

pub use builder::ProgramBuilder;
pub use ir::{LiteralPool, Program, Tape};
pub use op::{Instruction, LiteralIndex, TapeOffset};
