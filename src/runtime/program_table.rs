use crate::bytecode::ir::{LiteralPool, Program, Tape};
use crate::bytecode::verify::check_program;
use crate::runtime::runtime_error::{ErrorKind, RuntimeError};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Named programs of one VM. Entries are immutable once registered.
#[derive(Debug, Default)]
pub struct ProgramTable {
    programs: HashMap<String, Rc<Program>>,
}

impl ProgramTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies and stores a program. An existing name is never replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        tape: Tape,
        pool: LiteralPool,
    ) -> Result<(), RuntimeError> {
        let name = name.into();
        if self.programs.contains_key(&name) {
            return Err(ErrorKind::DuplicateProgram(name).into());
        }

        let program = Program::new(tape, pool);
        check_program(&program)
            .map_err(|e| RuntimeError::from(e).with_context(format!("{}@register", name)))?;

        debug!(
            program = %name,
            instructions = program.tape.len(),
            literals = program.pool.len(),
            "registered program"
        );
        self.programs.insert(name, Rc::new(program));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Rc<Program>> {
        self.programs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.programs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
