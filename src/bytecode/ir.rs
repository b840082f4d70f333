use crate::bytecode::op::{Instruction, LiteralIndex};
use crate::lang::value::Value;

/// Instruction sequence of one program. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tape {
    instructions: Vec<Instruction>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }
}

impl FromIterator<Instruction> for Tape {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Tape {
            instructions: iter.into_iter().collect(),
        }
    }
}

/// Constants referenced by index from a tape. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiteralPool {
    literals: Vec<Value>,
}

impl LiteralPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: Value) -> LiteralIndex {
        self.literals.push(value);
        LiteralIndex(self.literals.len() - 1)
    }

    pub fn get(&self, index: LiteralIndex) -> Option<&Value> {
        self.literals.get(index.0)
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }
}

impl FromIterator<Value> for LiteralPool {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        LiteralPool {
            literals: iter.into_iter().collect(),
        }
    }
}

/// A registered program: tape plus its literal pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub tape: Tape,
    pub pool: LiteralPool,
}

impl Program {
    pub fn new(tape: Tape, pool: LiteralPool) -> Self {
        Self { tape, pool }
    }
}
