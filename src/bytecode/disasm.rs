use crate::bytecode::ir::Program;
use crate::bytecode::op::{Instruction, LiteralIndex};
use std::io::{self, Write};

/// Print disassembly of a named program
pub fn print_program<W: Write>(out: &mut W, name: &str, program: &Program) -> io::Result<()> {
    writeln!(out, "════════════════════════════════════════")?;
    writeln!(out, " {}", name)?;
    writeln!(
        out,
        " {} instructions, {} literals",
        program.tape.len(),
        program.pool.len()
    )?;
    writeln!(out, "════════════════════════════════════════")?;
    disassemble(out, program)?;
    writeln!(out)
}

/// Disassemble a program's tape, marking jump targets
pub fn disassemble<W: Write>(out: &mut W, program: &Program) -> io::Result<()> {
    let jump_targets = collect_jump_targets(program);

    for (pc, instruction) in program.tape.iter().enumerate() {
        if jump_targets.contains(&pc) {
            writeln!(out, "      ┌──────────────────────────────────")?;
        }

        write!(out, "{:04} ", pc)?;

        if jump_targets.contains(&pc) {
            write!(out, "► ")?;
        } else {
            write!(out, "  ")?;
        }

        print_instruction(out, program, instruction)?;
    }
    Ok(())
}

fn collect_jump_targets(program: &Program) -> Vec<usize> {
    let mut targets = Vec::new();

    for instruction in program.tape.iter() {
        if let Some(target) = instruction.jump_target() {
            if !targets.contains(&target.0) {
                targets.push(target.0);
            }
        }
    }

    targets
}

fn literal_text(program: &Program, idx: LiteralIndex) -> String {
    match program.pool.get(idx) {
        Some(value) => format!("#{} ({})", idx.0, value),
        None => format!("#{} (<missing>)", idx.0),
    }
}

fn print_instruction<W: Write>(
    out: &mut W,
    program: &Program,
    instruction: &Instruction,
) -> io::Result<()> {
    let name = instruction.name();

    match instruction {
        Instruction::If(target) | Instruction::While(target) => {
            writeln!(out, "{:<16} ↓ (→ {:04})", name, target.0)
        }
        Instruction::CondEnd(Some(back)) => {
            writeln!(out, "{:<16} ↑ (→ {:04})", name, back.0)
        }
        Instruction::Add => writeln!(out, "{:<16} ; ( x y -- x+y )", name),
        Instruction::Eq | Instruction::NotEq => writeln!(out, "{:<16} ; ( x y -- bool )", name),
        Instruction::Print => writeln!(out, "{:<16} ; ( v -- )", name),
        Instruction::Append => writeln!(out, "{:<16} ; ( arr v -- arr )", name),
        Instruction::Insert => writeln!(out, "{:<16} ; ( obj key v -- obj )", name),
        Instruction::Next | Instruction::AtEnd => writeln!(out, "{:<16} ; ( -- bool )", name),
        Instruction::RenameKey => writeln!(out, "{:<16} ; ( key -- )", name),
        other => match other.literal() {
            Some(idx) => writeln!(out, "{:<16} {}", name, literal_text(program, idx)),
            None => writeln!(out, "{}", name),
        },
    }
}
