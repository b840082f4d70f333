use crate::bytecode::ir::{LiteralPool, Program, Tape};
use crate::bytecode::op::{Instruction, LiteralIndex, TapeOffset};
use crate::lang::value::Value;

/// Position of an emitted `If`/`While` whose target is patched later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Start of a loop condition, recorded before the condition code is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStart(usize);

/// Builds a tape and its literal pool side by side.
///
/// ```ignore
/// let mut b = ProgramBuilder::new();
/// b.int(10).int(20).op(Instruction::Add).op(Instruction::Print).op(Instruction::Exit);
/// let program = b.build();
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    ops: Vec<Instruction>,
    pool: LiteralPool,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will land on.
    pub fn pc(&self) -> TapeOffset {
        TapeOffset(self.ops.len())
    }

    pub fn op(&mut self, instruction: Instruction) -> &mut Self {
        self.ops.push(instruction);
        self
    }

    /// Adds a literal to the pool without emitting anything.
    pub fn constant(&mut self, value: impl Into<Value>) -> LiteralIndex {
        self.pool.write(value.into())
    }

    pub fn int(&mut self, n: i64) -> &mut Self {
        let idx = self.constant(n);
        self.op(Instruction::Int(idx))
    }

    pub fn uint(&mut self, n: u64) -> &mut Self {
        let idx = self.constant(n);
        self.op(Instruction::UInt(idx))
    }

    pub fn float(&mut self, n: f64) -> &mut Self {
        let idx = self.constant(n);
        self.op(Instruction::Float(idx))
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        let idx = self.constant(s);
        self.op(Instruction::String(idx))
    }

    pub fn bool(&mut self, b: bool) -> &mut Self {
        let idx = self.constant(b);
        self.op(Instruction::Bool(idx))
    }

    pub fn null(&mut self) -> &mut Self {
        let idx = self.pool.write(Value::Null);
        self.op(Instruction::Null(idx))
    }

    pub fn load_var(&mut self, name: &str) -> &mut Self {
        let idx = self.constant(name);
        self.op(Instruction::LoadVar(idx))
    }

    pub fn store_var(&mut self, name: &str) -> &mut Self {
        let idx = self.constant(name);
        self.op(Instruction::StoreVar(idx))
    }

    /// `path` segments are keys (strings) or array indices (unsigned).
    pub fn cd(&mut self, path: Vec<Value>) -> &mut Self {
        let idx = self.pool.write(Value::Array(path));
        self.op(Instruction::Cd(idx))
    }

    pub fn call(&mut self, program: &str) -> &mut Self {
        let idx = self.constant(program);
        self.op(Instruction::Call(idx))
    }

    /// Emits an `If`; the condition must already be on the stack.
    pub fn begin_if(&mut self) -> Label {
        let at = self.ops.len();
        self.ops.push(Instruction::If(TapeOffset(at)));
        Label(at)
    }

    pub fn end_if(&mut self, label: Label) -> &mut Self {
        let end = self.ops.len();
        self.ops.push(Instruction::CondEnd(None));
        self.ops[label.0] = Instruction::If(TapeOffset(end));
        self
    }

    /// Marks where the loop condition code starts.
    pub fn loop_start(&mut self) -> LoopStart {
        LoopStart(self.ops.len())
    }

    /// Emits a `While` after the condition code.
    pub fn begin_while(&mut self) -> Label {
        let at = self.ops.len();
        self.ops.push(Instruction::While(TapeOffset(at)));
        Label(at)
    }

    pub fn end_while(&mut self, start: LoopStart, label: Label) -> &mut Self {
        let end = self.ops.len();
        self.ops.push(Instruction::CondEnd(Some(TapeOffset(start.0))));
        self.ops[label.0] = Instruction::While(TapeOffset(end));
        self
    }

    pub fn build(self) -> Program {
        Program::new(self.ops.into_iter().collect::<Tape>(), self.pool)
    }

    pub fn into_parts(self) -> (Tape, LiteralPool) {
        let program = self.build();
        (program.tape, program.pool)
    }
}
