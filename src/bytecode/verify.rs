use crate::bytecode::ir::Program;
use crate::bytecode::op::{Instruction, TapeOffset};
use crate::runtime::runtime_error::{RuntimeError, unknown_opcode};

#[derive(Debug)]
pub struct TapeCheckError {
    pub pc: usize,
    pub message: String,
}

impl std::fmt::Display for TapeCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tape-check error at {}: {}", self.pc, self.message)
    }
}

impl TapeCheckError {
    fn new(pc: usize, message: impl Into<String>) -> Self {
        Self {
            pc,
            message: message.into(),
        }
    }
}

impl From<TapeCheckError> for RuntimeError {
    fn from(err: TapeCheckError) -> Self {
        unknown_opcode(err.pc, err.message)
    }
}

/// Checks that every operand on the tape resolves.
///
/// - literal indices are inside the pool
/// - `If`/`While` point forward at a `CondEnd`; an `If` closes with a plain
///   `CondEnd`, a `While` with one looping back to or before the `While`
/// - a looping `CondEnd` points backward
///
/// Literal types are checked at run time, not here.
pub fn check_program(program: &Program) -> Result<(), TapeCheckError> {
    let tape = &program.tape;

    for (pc, instruction) in tape.iter().enumerate() {
        if let Some(idx) = instruction.literal() {
            if program.pool.get(idx).is_none() {
                return Err(TapeCheckError::new(
                    pc,
                    format!(
                        "{} refers to literal {} but the pool has {} entries",
                        instruction.name(),
                        idx.0,
                        program.pool.len()
                    ),
                ));
            }
        }

        match instruction {
            Instruction::If(TapeOffset(target)) | Instruction::While(TapeOffset(target)) => {
                if *target <= pc {
                    return Err(TapeCheckError::new(
                        pc,
                        format!("{} target {} does not follow it", instruction.name(), target),
                    ));
                }
                match (instruction, tape.get(*target)) {
                    (Instruction::If(_), Some(Instruction::CondEnd(None))) => {}
                    (Instruction::While(_), Some(Instruction::CondEnd(Some(back))))
                        if back.0 <= pc => {}
                    (_, found) => {
                        return Err(TapeCheckError::new(
                            pc,
                            format!(
                                "{} target {} is not a matching COND_END (found {})",
                                instruction.name(),
                                target,
                                found.map_or("end of tape", |i| i.name())
                            ),
                        ));
                    }
                }
            }
            Instruction::CondEnd(Some(TapeOffset(back))) if *back >= pc => {
                return Err(TapeCheckError::new(
                    pc,
                    format!("COND_END loop target {} does not precede it", back),
                ));
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{LiteralPool, Tape};
    use crate::bytecode::op::LiteralIndex;
    use crate::lang::value::Value;

    fn program(ops: Vec<Instruction>, literals: Vec<Value>) -> Program {
        Program::new(
            ops.into_iter().collect::<Tape>(),
            literals.into_iter().collect::<LiteralPool>(),
        )
    }

    #[test]
    fn test_valid_program() {
        let prog = program(
            vec![
                Instruction::Int(LiteralIndex(0)),
                Instruction::Int(LiteralIndex(1)),
                Instruction::Add,
                Instruction::Print,
                Instruction::Exit,
            ],
            vec![Value::Int(10), Value::Int(20)],
        );
        assert!(check_program(&prog).is_ok());
    }

    #[test]
    fn test_literal_out_of_range() {
        let prog = program(vec![Instruction::Int(LiteralIndex(1))], vec![Value::Int(1)]);
        let err = check_program(&prog).unwrap_err();
        assert_eq!(err.pc, 0);
        assert!(err.message.contains("pool has 1 entries"));
    }

    #[test]
    fn test_if_must_target_cond_end() {
        let prog = program(
            vec![
                Instruction::Bool(LiteralIndex(0)),
                Instruction::If(TapeOffset(2)),
                Instruction::Print,
            ],
            vec![Value::Bool(true)],
        );
        let err = check_program(&prog).unwrap_err();
        assert_eq!(err.pc, 1);
        assert!(err.message.contains("found PRINT"));
    }

    #[test]
    fn test_if_past_end() {
        let prog = program(
            vec![Instruction::Bool(LiteralIndex(0)), Instruction::If(TapeOffset(7))],
            vec![Value::Bool(true)],
        );
        let err = check_program(&prog).unwrap_err();
        assert!(err.message.contains("end of tape"));
    }

    #[test]
    fn test_backward_if_rejected() {
        let prog = program(
            vec![Instruction::CondEnd(None), Instruction::If(TapeOffset(0))],
            vec![],
        );
        assert!(check_program(&prog).is_err());
    }

    #[test]
    fn test_while_needs_loop_back() {
        let prog = program(
            vec![
                Instruction::Bool(LiteralIndex(0)),
                Instruction::While(TapeOffset(2)),
                Instruction::CondEnd(None),
            ],
            vec![Value::Bool(false)],
        );
        assert!(check_program(&prog).is_err());

        let prog = program(
            vec![
                Instruction::Bool(LiteralIndex(0)),
                Instruction::While(TapeOffset(2)),
                Instruction::CondEnd(Some(TapeOffset(0))),
            ],
            vec![Value::Bool(false)],
        );
        assert!(check_program(&prog).is_ok());
    }

    #[test]
    fn test_cond_end_forward_loop_rejected() {
        let prog = program(vec![Instruction::CondEnd(Some(TapeOffset(0)))], vec![]);
        let err = check_program(&prog).unwrap_err();
        assert!(err.message.contains("does not precede"));
    }
}
