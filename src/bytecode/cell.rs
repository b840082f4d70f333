//! Raw positional tape format.
//!
//! A raw tape is a flat list of `u64` cells. A cell is an opcode tag, except
//! that every opcode taking an operand is followed by exactly one operand
//! cell (a literal index or a tape offset). `decode` turns such a list into a
//! [`Tape`] of typed instructions, `encode` goes the other way.

use crate::bytecode::ir::Tape;
use crate::bytecode::op::{Instruction, LiteralIndex, TapeOffset};
use crate::runtime::runtime_error::{RuntimeError, unknown_opcode};

/// Operand of a `COND_END` that closes an `IF`.
pub const NO_TARGET: u64 = u64::MAX;

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Add = 1,
    Return = 2,
    Exit = 3,
    Variable = 4,
    If = 5,
    While = 6,
    CondEnd = 7,
    Eq = 8,
    NotEq = 9,
    String = 10,
    Int = 11,
    UInt = 12,
    Float = 13,
    Bool = 14,
    Null = 15,
    Print = 16,
    NewLocalArray = 17,
    NewLocalObject = 18,
    Cd = 19,
    StoreVariable = 20,
    Append = 21,
    Insert = 22,
    Enter = 23,
    Quit = 24,
    Next = 25,
    AtEnd = 26,
    Load = 27,
    Key = 28,
    RenameKey = 29,
    Delete = 30,
    Call = 31,
}

impl OpCode {
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            OpCode::Variable
                | OpCode::StoreVariable
                | OpCode::If
                | OpCode::While
                | OpCode::CondEnd
                | OpCode::String
                | OpCode::Int
                | OpCode::UInt
                | OpCode::Float
                | OpCode::Bool
                | OpCode::Null
                | OpCode::Cd
                | OpCode::Call
        )
    }
}

impl TryFrom<u64> for OpCode {
    type Error = u64;

    fn try_from(tag: u64) -> Result<Self, Self::Error> {
        use OpCode::*;
        Ok(match tag {
            1 => Add,
            2 => Return,
            3 => Exit,
            4 => Variable,
            5 => If,
            6 => While,
            7 => CondEnd,
            8 => Eq,
            9 => NotEq,
            10 => String,
            11 => Int,
            12 => UInt,
            13 => Float,
            14 => Bool,
            15 => Null,
            16 => Print,
            17 => NewLocalArray,
            18 => NewLocalObject,
            19 => Cd,
            20 => StoreVariable,
            21 => Append,
            22 => Insert,
            23 => Enter,
            24 => Quit,
            25 => Next,
            26 => AtEnd,
            27 => Load,
            28 => Key,
            29 => RenameKey,
            30 => Delete,
            31 => Call,
            other => return Err(other),
        })
    }
}

/// Decodes raw cells into a tape.
///
/// Jump operands are cell positions in the raw tape; they are translated to
/// instruction offsets. `pc` in errors is the cell position.
pub fn decode(cells: &[u64]) -> Result<Tape, RuntimeError> {
    // (cell position, opcode, operand)
    let mut raw = Vec::new();
    let mut pos = 0;

    while pos < cells.len() {
        let tag = cells[pos];
        let op = OpCode::try_from(tag)
            .map_err(|tag| unknown_opcode(pos, format!("unknown opcode tag {}", tag)))?;

        let operand = if op.has_operand() {
            let value = *cells.get(pos + 1).ok_or_else(|| {
                unknown_opcode(pos, format!("{:?} is missing its operand cell", op))
            })?;
            Some(value)
        } else {
            None
        };

        raw.push((pos, op, operand));
        pos += if operand.is_some() { 2 } else { 1 };
    }

    let offset_of = |at: usize, cell: u64| -> Result<TapeOffset, RuntimeError> {
        raw.iter()
            .position(|(p, _, _)| *p as u64 == cell)
            .map(TapeOffset)
            .ok_or_else(|| {
                unknown_opcode(at, format!("jump target {} is not an opcode cell", cell))
            })
    };

    raw.iter()
        .map(|&(at, op, operand)| {
            let lit = || LiteralIndex(operand.unwrap_or_default() as usize);
            Ok(match op {
                OpCode::Add => Instruction::Add,
                OpCode::Return => Instruction::Return,
                OpCode::Exit => Instruction::Exit,
                OpCode::Variable => Instruction::LoadVar(lit()),
                OpCode::StoreVariable => Instruction::StoreVar(lit()),
                OpCode::If => Instruction::If(offset_of(at, operand.unwrap_or_default())?),
                OpCode::While => Instruction::While(offset_of(at, operand.unwrap_or_default())?),
                OpCode::CondEnd => match operand {
                    Some(NO_TARGET) | None => Instruction::CondEnd(None),
                    Some(cell) => Instruction::CondEnd(Some(offset_of(at, cell)?)),
                },
                OpCode::Eq => Instruction::Eq,
                OpCode::NotEq => Instruction::NotEq,
                OpCode::String => Instruction::String(lit()),
                OpCode::Int => Instruction::Int(lit()),
                OpCode::UInt => Instruction::UInt(lit()),
                OpCode::Float => Instruction::Float(lit()),
                OpCode::Bool => Instruction::Bool(lit()),
                OpCode::Null => Instruction::Null(lit()),
                OpCode::Print => Instruction::Print,
                OpCode::NewLocalArray => Instruction::NewLocalArray,
                OpCode::NewLocalObject => Instruction::NewLocalObject,
                OpCode::Cd => Instruction::Cd(lit()),
                OpCode::Append => Instruction::Append,
                OpCode::Insert => Instruction::Insert,
                OpCode::Enter => Instruction::Enter,
                OpCode::Quit => Instruction::Quit,
                OpCode::Next => Instruction::Next,
                OpCode::AtEnd => Instruction::AtEnd,
                OpCode::Load => Instruction::Load,
                OpCode::Key => Instruction::Key,
                OpCode::RenameKey => Instruction::RenameKey,
                OpCode::Delete => Instruction::Delete,
                OpCode::Call => Instruction::Call(lit()),
            })
        })
        .collect()
}

fn opcode_of(instruction: &Instruction) -> OpCode {
    match instruction {
        Instruction::Exit => OpCode::Exit,
        Instruction::Return => OpCode::Return,
        Instruction::Int(_) => OpCode::Int,
        Instruction::UInt(_) => OpCode::UInt,
        Instruction::Float(_) => OpCode::Float,
        Instruction::String(_) => OpCode::String,
        Instruction::Bool(_) => OpCode::Bool,
        Instruction::Null(_) => OpCode::Null,
        Instruction::Add => OpCode::Add,
        Instruction::Eq => OpCode::Eq,
        Instruction::NotEq => OpCode::NotEq,
        Instruction::Print => OpCode::Print,
        Instruction::LoadVar(_) => OpCode::Variable,
        Instruction::StoreVar(_) => OpCode::StoreVariable,
        Instruction::If(_) => OpCode::If,
        Instruction::While(_) => OpCode::While,
        Instruction::CondEnd(_) => OpCode::CondEnd,
        Instruction::NewLocalArray => OpCode::NewLocalArray,
        Instruction::NewLocalObject => OpCode::NewLocalObject,
        Instruction::Append => OpCode::Append,
        Instruction::Insert => OpCode::Insert,
        Instruction::Cd(_) => OpCode::Cd,
        Instruction::Enter => OpCode::Enter,
        Instruction::Quit => OpCode::Quit,
        Instruction::Next => OpCode::Next,
        Instruction::AtEnd => OpCode::AtEnd,
        Instruction::Load => OpCode::Load,
        Instruction::Key => OpCode::Key,
        Instruction::RenameKey => OpCode::RenameKey,
        Instruction::Delete => OpCode::Delete,
        Instruction::Call(_) => OpCode::Call,
    }
}

/// Encodes a tape into raw cells. Inverse of [`decode`].
pub fn encode(tape: &Tape) -> Vec<u64> {
    // cell position of each instruction, for jump operands
    let mut positions = Vec::with_capacity(tape.len());
    let mut pos = 0u64;
    for instruction in tape.iter() {
        positions.push(pos);
        pos += if opcode_of(instruction).has_operand() { 2 } else { 1 };
    }
    let cell_of = |target: TapeOffset| positions.get(target.0).copied().unwrap_or(pos);

    let mut cells = Vec::with_capacity(pos as usize);
    for instruction in tape.iter() {
        let op = opcode_of(instruction);
        cells.push(op as u64);
        if !op.has_operand() {
            continue;
        }
        let operand = match instruction {
            Instruction::If(target) | Instruction::While(target) => cell_of(*target),
            Instruction::CondEnd(back) => back.map_or(NO_TARGET, cell_of),
            other => other.literal().map_or(0, |idx| idx.0 as u64),
        };
        cells.push(operand);
    }
    cells
}
