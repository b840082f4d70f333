pub mod explorer;
pub mod program_table;
pub mod runtime_error;
pub mod vm;

pub use explorer::{Explorer, Frame};
pub use program_table::ProgramTable;
pub use runtime_error::{ErrorKind, RuntimeError};
pub use vm::Vm;
