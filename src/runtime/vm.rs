use crate::bytecode::ir::{LiteralPool, Program, Tape};
use crate::bytecode::op::{Instruction, LiteralIndex, TapeOffset};
use crate::config::VmConfig;
use crate::lang::document::{Document, Node};
use crate::lang::value::Value;
use crate::runtime::explorer::Explorer;
use crate::runtime::program_table::ProgramTable;
use crate::runtime::runtime_error::{
    ErrorKind, RuntimeError, index_out_of_bounds, stack_underflow, type_error, unknown_program,
};
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::{debug, trace};

/// How an activation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Return,
    Exit,
}

/// What the dispatcher does after one instruction.
enum Step {
    Next,
    Jump(usize),
    Return,
    Exit,
}

/// Variable bindings of one activation.
#[derive(Debug, Default)]
struct Activation {
    variables: HashMap<String, Value>,
}

/// Stack machine over one document.
///
/// The VM owns the document, the cursor over it and the operand stack.
/// `PRINT` writes to `W`, standard output unless built with
/// [`Vm::with_output`].
pub struct Vm<W: Write = io::Stdout> {
    stack: Vec<Value>,
    programs: ProgramTable,
    document: Document,
    explorer: Explorer,
    config: VmConfig,
    out: W,
    call_depth: usize,
    steps: usize,
}

impl Vm<io::Stdout> {
    pub fn new(root: Value) -> Self {
        Self::with_config(root, VmConfig::default())
    }

    pub fn with_config(root: Value, config: VmConfig) -> Self {
        Self::with_output(root, config, io::stdout())
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(root: Value, config: VmConfig, out: W) -> Self {
        let document = Document::new(root);
        let explorer = Explorer::new(&document);
        Self {
            stack: Vec::new(),
            programs: ProgramTable::new(),
            document,
            explorer,
            config,
            out,
            call_depth: 0,
            steps: 0,
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        tape: Tape,
        pool: LiteralPool,
    ) -> Result<(), RuntimeError> {
        self.programs.register(name, tape, pool)
    }

    pub fn register_program(
        &mut self,
        name: impl Into<String>,
        program: Program,
    ) -> Result<(), RuntimeError> {
        self.programs.register(name, program.tape, program.pool)
    }

    pub fn programs(&self) -> &ProgramTable {
        &self.programs
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// The operand stack survives between runs; this is the only way to
    /// empty it.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Writes the whole document in the dump layout, followed by a newline.
    ///
    /// The root container's brackets wrap the cursor dump of its entries; a
    /// scalar root is written as is. The VM's own cursor is not moved.
    pub fn dump<O: Write>(&self, out: &mut O) -> Result<(), RuntimeError> {
        let root = self.document.root();
        match self.document.node(root) {
            Some(Node::Scalar(value)) => writeln!(out, "{}", value)?,
            Some(node) => {
                let (open, close) = if node.is_array() { ("[", "]") } else { ("{", "}") };
                write!(out, "{} ", open)?;
                let mut cursor = Explorer::new(&self.document);
                cursor.dump(&self.document, out, self.config.max_nesting_depth)?;
                writeln!(out, "{}", close)?;
            }
            None => return Err(index_out_of_bounds(root.0, self.document.node_count())),
        }
        Ok(())
    }

    /// Writes the document as strict JSON. Bound by `max_nesting_depth` like
    /// [`Vm::dump`]; nothing is written when the document is too deep.
    pub fn dump_json<O: Write>(&self, out: &mut O) -> Result<(), RuntimeError> {
        let limit = self.config.max_nesting_depth;
        if self.document.nesting_depth(self.document.root()) > limit {
            return Err(ErrorKind::NestingTooDeep { limit }.into());
        }
        let value = self.document.to_value(self.document.root());
        serde_json::to_writer(&mut *out, &value).map_err(io::Error::from)?;
        writeln!(out)?;
        Ok(())
    }

    /// Runs the program registered under `name`.
    ///
    /// The program counter starts at 0 for every run; the operand stack is
    /// left as the previous run left it.
    pub fn run(&mut self, name: &str) -> Result<(), RuntimeError> {
        self.reset_execution_state();

        let program = self.programs.get(name).ok_or_else(|| unknown_program(name))?;

        debug!(program = name, depth = self.stack.len(), "run start");
        let flow = self.exec(name, &program)?;
        debug!(program = name, ?flow, steps = self.steps, "run finished");

        Ok(())
    }

    fn reset_execution_state(&mut self) {
        self.steps = 0;
        self.call_depth = 0;
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(ErrorKind::StepLimitExceeded { limit: max }.into());
            }
        }

        Ok(())
    }

    fn exec(&mut self, name: &str, program: &Program) -> Result<Flow, RuntimeError> {
        self.call_depth += 1;

        if self.call_depth > self.config.max_call_depth {
            self.call_depth -= 1;
            return Err(ErrorKind::CallDepthExceeded {
                limit: self.config.max_call_depth,
                program: name.to_string(),
            }
            .into());
        }

        let result = self.exec_inner(name, program);

        self.call_depth -= 1;
        result
    }

    fn exec_inner(&mut self, name: &str, program: &Program) -> Result<Flow, RuntimeError> {
        let mut activation = Activation::default();
        let mut pc: usize = 0;

        while let Some(instruction) = program.tape.get(pc) {
            let step = self
                .check_limits()
                .and_then(|_| {
                    trace!(program = name, pc, op = instruction.name(), "dispatch");
                    self.step(program, instruction, &mut activation)
                })
                .map_err(|e| e.with_context(format!("{}@{}", name, pc)))?;

            match step {
                Step::Next => pc += 1,
                Step::Jump(target) => pc = target,
                Step::Return => return Ok(Flow::Return),
                Step::Exit => return Ok(Flow::Exit),
            }
        }

        Ok(Flow::Return)
    }

    fn step(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        activation: &mut Activation,
    ) -> Result<Step, RuntimeError> {
        match *instruction {
            Instruction::Exit => return Ok(Step::Exit),
            Instruction::Return => return Ok(Step::Return),

            // Literals
            Instruction::Int(idx)
            | Instruction::UInt(idx)
            | Instruction::Float(idx)
            | Instruction::String(idx)
            | Instruction::Bool(idx)
            | Instruction::Null(idx) => {
                let value = literal(program, idx)?;
                let expected = instruction.literal_type().unwrap_or("literal");
                if value.type_name() != expected {
                    return Err(type_error(expected, value.type_name()));
                }
                self.push(value.clone())?;
            }

            // Arithmetic
            Instruction::Add => {
                self.require(2)?;
                let y = self.pop()?;
                let x = self.pop()?;
                let sum = match (&x, &y) {
                    (Value::Int(a), Value::Int(b)) => {
                        Value::Int(a.checked_add(*b).ok_or_else(|| overflow(&x, &y))?)
                    }
                    (Value::UInt(a), Value::UInt(b)) => {
                        Value::UInt(a.checked_add(*b).ok_or_else(|| overflow(&x, &y))?)
                    }
                    (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                    _ if x.same_type(&y) => return Err(type_error("number", x.type_name())),
                    _ => return Err(type_error(x.type_name(), y.type_name())),
                };
                self.push(sum)?;
            }

            // Comparison
            Instruction::Eq | Instruction::NotEq => {
                self.require(2)?;
                let y = self.pop()?;
                let x = self.pop()?;
                if !x.same_type(&y) {
                    return Err(type_error(x.type_name(), y.type_name()));
                }
                let equal = x == y;
                self.push(Value::Bool(if *instruction == Instruction::Eq {
                    equal
                } else {
                    !equal
                }))?;
            }

            // I/O
            Instruction::Print => {
                let value = self.pop()?;
                writeln!(self.out, "{}", value)?;
            }

            // Variables
            Instruction::LoadVar(idx) => {
                let name = string_literal(program, idx)?;
                let value = activation.variables.get(name).cloned().ok_or_else(|| {
                    RuntimeError::new(ErrorKind::UnboundVariable(name.to_string()))
                })?;
                self.push(value)?;
            }
            Instruction::StoreVar(idx) => {
                let name = string_literal(program, idx)?;
                let value = self.pop()?;
                activation.variables.insert(name.to_string(), value);
            }

            // Structured control flow
            Instruction::If(TapeOffset(end)) | Instruction::While(TapeOffset(end)) => {
                if !self.pop_bool()? {
                    return Ok(Step::Jump(end + 1));
                }
            }
            Instruction::CondEnd(None) => {}
            Instruction::CondEnd(Some(TapeOffset(start))) => return Ok(Step::Jump(start)),

            // Detached containers
            Instruction::NewLocalArray => self.push(Value::Array(Vec::new()))?,
            Instruction::NewLocalObject => self.push(Value::Object(Vec::new()))?,
            Instruction::Append => {
                self.require(2)?;
                let item = self.pop()?;
                match self.pop()? {
                    Value::Array(mut items) => {
                        items.push(item);
                        self.push(Value::Array(items))?;
                    }
                    other => return Err(type_error("array", other.type_name())),
                }
            }
            Instruction::Insert => {
                self.require(3)?;
                let value = self.pop()?;
                let key = self.pop()?;
                let target = self.pop()?;
                let (mut entries, key) = match (target, key) {
                    (Value::Object(entries), Value::String(key)) => (entries, key),
                    (Value::Object(_), key) => return Err(type_error("string", key.type_name())),
                    (other, _) => return Err(type_error("object", other.type_name())),
                };
                if entries.iter().any(|(k, _)| *k == key) {
                    return Err(ErrorKind::KeyCollision(key).into());
                }
                entries.push((key, value));
                self.push(Value::Object(entries))?;
            }

            // Cursor
            Instruction::Cd(idx) => match literal(program, idx)? {
                Value::Array(path) => self.explorer.goto(&self.document, path)?,
                other => return Err(type_error("array", other.type_name())),
            },
            Instruction::Enter => {
                self.explorer.enter(&self.document);
            }
            Instruction::Quit => {
                self.explorer.quit();
            }
            Instruction::Next => {
                let moved = self.explorer.advance(&self.document);
                self.push(Value::Bool(moved))?;
            }
            Instruction::AtEnd => {
                let at_end = self.explorer.at_end(&self.document);
                self.push(Value::Bool(at_end))?;
            }
            Instruction::Load => {
                let id = self.explorer.current(&self.document).ok_or_else(|| {
                    let len = self
                        .explorer
                        .frames()
                        .last()
                        .and_then(|frame| self.document.node(frame.node))
                        .map_or(0, Node::len);
                    index_out_of_bounds(self.explorer.current_index(), len)
                })?;
                let value = self.document.to_value(id);
                self.push(value)?;
            }
            Instruction::Key => {
                let key = self.explorer.current_key(&self.document);
                self.push(key)?;
            }
            Instruction::RenameKey => {
                let key = self.pop()?;
                self.explorer.rename_key(&mut self.document, key)?;
            }
            Instruction::Delete => self.explorer.delete_current(&mut self.document)?,

            Instruction::Call(idx) => {
                let callee = string_literal(program, idx)?;
                let target = self
                    .programs
                    .get(callee)
                    .ok_or_else(|| unknown_program(callee))?;
                trace!(program = callee, depth = self.call_depth + 1, "call");
                if self.exec(callee, &target)? == Flow::Exit {
                    return Ok(Step::Exit);
                }
            }
        }

        Ok(Step::Next)
    }

    // Stack operations

    /// Fails without pushing once the stack already holds `max_stack_size`
    /// values.
    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(ErrorKind::StackOverflow {
                limit: self.config.max_stack_size,
            }
            .into());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| stack_underflow(1, 0))
    }

    /// Fails before anything is popped when fewer than `n` values are there.
    fn require(&self, n: usize) -> Result<(), RuntimeError> {
        if self.stack.len() < n {
            return Err(stack_underflow(n, self.stack.len()));
        }
        Ok(())
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(type_error("bool", other.type_name())),
        }
    }
}

fn literal(program: &Program, idx: LiteralIndex) -> Result<&Value, RuntimeError> {
    program
        .pool
        .get(idx)
        .ok_or_else(|| index_out_of_bounds(idx.0, program.pool.len()))
}

fn string_literal(program: &Program, idx: LiteralIndex) -> Result<&str, RuntimeError> {
    let value = literal(program, idx)?;
    value
        .as_str()
        .ok_or_else(|| type_error("string", value.type_name()))
}

fn overflow(x: &Value, y: &Value) -> RuntimeError {
    RuntimeError::new(ErrorKind::ArithmeticOverflow(format!("{} + {}", x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::ProgramBuilder;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    // ============================================================
    // Test Helpers
    // ============================================================

    type TestVm = Vm<Vec<u8>>;

    fn vm_over(root: Value) -> TestVm {
        Vm::with_output(root, VmConfig::default(), Vec::new())
    }

    fn empty_vm() -> TestVm {
        vm_over(Value::Object(Vec::new()))
    }

    /// Register `b` as "main" and run it
    fn run_main(vm: &mut TestVm, b: ProgramBuilder) -> Result<(), RuntimeError> {
        let (tape, pool) = b.into_parts();
        vm.register("main", tape, pool)?;
        vm.run("main")
    }

    /// Run a program on a fresh VM and return the resulting stack
    fn run_ops(build: impl FnOnce(&mut ProgramBuilder)) -> Result<Vec<Value>, RuntimeError> {
        let mut b = ProgramBuilder::new();
        build(&mut b);
        let mut vm = empty_vm();
        run_main(&mut vm, b)?;
        Ok(vm.stack().to_vec())
    }

    fn assert_stack(build: impl FnOnce(&mut ProgramBuilder), expected: Vec<Value>) {
        let stack = run_ops(build).expect("execution should succeed");
        assert_eq!(stack, expected, "stack mismatch");
    }

    fn printed(vm: &TestVm) -> String {
        String::from_utf8(vm.output().clone()).unwrap()
    }

    fn dumped<O: Write>(vm: &Vm<O>) -> String {
        let mut out = Vec::new();
        vm.dump(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    // ============================================================
    // Literals and arithmetic
    // ============================================================

    #[test]
    fn test_add_and_print() {
        let doc = obj(vec![("a", Value::Int(1))]);
        let mut vm = vm_over(doc.clone());
        let mut b = ProgramBuilder::new();
        b.int(10)
            .int(20)
            .op(Instruction::Add)
            .op(Instruction::Print)
            .op(Instruction::Exit);

        run_main(&mut vm, b).unwrap();

        assert_eq!(printed(&vm), "30\n");
        assert!(vm.stack().is_empty());
        assert_eq!(vm.document().to_value(vm.document().root()), doc);
    }

    #[rstest]
    #[case(Value::UInt(3), Value::UInt(4), Value::UInt(7))]
    #[case(Value::Float(1.5), Value::Float(2.25), Value::Float(3.75))]
    #[case(Value::Int(-5), Value::Int(2), Value::Int(-3))]
    fn test_add_same_types(#[case] x: Value, #[case] y: Value, #[case] sum: Value) {
        assert_stack(
            |b| {
                let xi = b.constant(x.clone());
                let yi = b.constant(y.clone());
                b.op(literal_op(&x, xi)).op(literal_op(&y, yi)).op(Instruction::Add);
            },
            vec![sum],
        );
    }

    fn literal_op(value: &Value, idx: LiteralIndex) -> Instruction {
        match value {
            Value::Int(_) => Instruction::Int(idx),
            Value::UInt(_) => Instruction::UInt(idx),
            Value::Float(_) => Instruction::Float(idx),
            Value::String(_) => Instruction::String(idx),
            Value::Bool(_) => Instruction::Bool(idx),
            _ => Instruction::Null(idx),
        }
    }

    #[test]
    fn test_add_type_mismatch_consumes_operands() {
        let mut vm = empty_vm();
        let mut b = ProgramBuilder::new();
        b.int(10).float(1.5).op(Instruction::Add);

        let err = run_main(&mut vm, b).unwrap_err();

        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
        assert_eq!(err.call_stack, vec!["main@2".to_string()]);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_add_non_numeric() {
        let err = run_ops(|b| {
            b.string("a").string("b").op(Instruction::Add);
        })
        .unwrap_err();
        match err.kind {
            ErrorKind::TypeMismatch { expected, found } => {
                assert_eq!(expected, "number");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_add_underflow_consumes_nothing() {
        let mut vm = empty_vm();
        let mut b = ProgramBuilder::new();
        b.int(1).op(Instruction::Add);

        let err = run_main(&mut vm, b).unwrap_err();

        assert!(matches!(
            err.kind,
            ErrorKind::StackUnderflow {
                needed: 2,
                available: 1
            }
        ));
        assert_eq!(vm.stack(), &[Value::Int(1)]);
    }

    #[test]
    fn test_add_overflow() {
        let err = run_ops(|b| {
            b.int(i64::MAX).int(1).op(Instruction::Add);
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ArithmeticOverflow(_)));
    }

    #[test]
    fn test_literal_tag_mismatch() {
        let err = run_ops(|b| {
            let idx = b.constant(1.5);
            b.op(Instruction::Int(idx));
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_literals_of_every_kind() {
        assert_stack(
            |b| {
                b.int(-1).uint(2).float(0.5).string("s").bool(false).null();
            },
            vec![
                Value::Int(-1),
                Value::UInt(2),
                Value::Float(0.5),
                Value::String("s".to_string()),
                Value::Bool(false),
                Value::Null,
            ],
        );
    }

    #[test]
    fn test_print_empty_stack() {
        let err = run_ops(|b| {
            b.op(Instruction::Print);
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StackUnderflow { .. }));
    }

    #[test]
    fn test_exit_stops_run() {
        assert_stack(
            |b| {
                b.int(1).op(Instruction::Exit).int(2);
            },
            vec![Value::Int(1)],
        );
    }

    // ============================================================
    // Program table
    // ============================================================

    #[test]
    fn test_unknown_program() {
        let mut vm = empty_vm();
        let err = vm.run("main").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownProgram(ref n) if n == "main"));
        assert!(printed(&vm).is_empty());
    }

    #[test]
    fn test_stack_shared_across_runs() {
        let mut vm = empty_vm();
        let mut b = ProgramBuilder::new();
        b.int(5);
        let (tape, pool) = b.into_parts();
        vm.register("push", tape, pool).unwrap();

        let mut b = ProgramBuilder::new();
        b.op(Instruction::Add).op(Instruction::Print);
        let (tape, pool) = b.into_parts();
        vm.register("sum", tape, pool).unwrap();

        vm.run("push").unwrap();
        vm.run("push").unwrap();
        vm.run("sum").unwrap();
        assert_eq!(printed(&vm), "10\n");

        vm.run("push").unwrap();
        vm.clear_stack();
        assert!(vm.run("sum").is_err());
    }

    // ============================================================
    // Comparison, variables, control flow
    // ============================================================

    #[rstest]
    #[case(Instruction::Eq, 3, 3, true)]
    #[case(Instruction::Eq, 3, 4, false)]
    #[case(Instruction::NotEq, 3, 4, true)]
    #[case(Instruction::NotEq, 3, 3, false)]
    fn test_equality(#[case] op: Instruction, #[case] x: i64, #[case] y: i64, #[case] out: bool) {
        assert_stack(
            |b| {
                b.int(x).int(y).op(op);
            },
            vec![Value::Bool(out)],
        );
    }

    #[test]
    fn test_equality_of_containers() {
        assert_stack(
            |b| {
                b.op(Instruction::NewLocalArray)
                    .int(1)
                    .op(Instruction::Append)
                    .op(Instruction::NewLocalArray)
                    .int(1)
                    .op(Instruction::Append)
                    .op(Instruction::Eq);
            },
            vec![Value::Bool(true)],
        );
    }

    #[test]
    fn test_equality_incomparable() {
        let err = run_ops(|b| {
            b.int(1).uint(1).op(Instruction::Eq);
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_variables() {
        assert_stack(
            |b| {
                b.int(7)
                    .store_var("x")
                    .load_var("x")
                    .load_var("x")
                    .op(Instruction::Add);
            },
            vec![Value::Int(14)],
        );
    }

    #[test]
    fn test_unbound_variable() {
        let err = run_ops(|b| {
            b.load_var("nope");
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnboundVariable(ref n) if n == "nope"));
    }

    #[rstest]
    #[case(true, vec![Value::Int(1), Value::Int(2)])]
    #[case(false, vec![Value::Int(2)])]
    fn test_if(#[case] cond: bool, #[case] expected: Vec<Value>) {
        assert_stack(
            |b| {
                b.bool(cond);
                let label = b.begin_if();
                b.int(1);
                b.end_if(label);
                b.int(2);
            },
            expected,
        );
    }

    #[test]
    fn test_if_requires_bool() {
        let err = run_ops(|b| {
            b.int(1);
            let label = b.begin_if();
            b.end_if(label);
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_while_counts_to_three() {
        let mut vm = empty_vm();
        let mut b = ProgramBuilder::new();
        b.int(0).store_var("i");
        let start = b.loop_start();
        b.load_var("i").int(3).op(Instruction::NotEq);
        let label = b.begin_while();
        b.load_var("i").op(Instruction::Print);
        b.load_var("i").int(1).op(Instruction::Add).store_var("i");
        b.end_while(start, label);

        run_main(&mut vm, b).unwrap();

        assert_eq!(printed(&vm), "0\n1\n2\n");
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_step_limit() {
        let config = VmConfig {
            max_steps: Some(50),
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Value::Null, config, Vec::new());
        let mut b = ProgramBuilder::new();
        let start = b.loop_start();
        b.bool(true);
        let label = b.begin_while();
        b.end_while(start, label);

        let err = run_main(&mut vm, b).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StepLimitExceeded { limit: 50 }));
    }

    #[test]
    fn test_stack_size_limit() {
        let config = VmConfig {
            max_stack_size: 2,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Value::Null, config, Vec::new());
        let mut b = ProgramBuilder::new();
        b.int(1).int(2).int(3).int(4);
        let err = run_main(&mut vm, b).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StackOverflow { limit: 2 }));
    }

    #[test]
    fn test_stack_limit_on_last_instruction() {
        let config = VmConfig {
            max_stack_size: 2,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Value::Null, config, Vec::new());
        let mut b = ProgramBuilder::new();
        b.int(1).int(2).int(3);

        let err = run_main(&mut vm, b).unwrap_err();

        assert!(matches!(err.kind, ErrorKind::StackOverflow { limit: 2 }));
        assert_eq!(err.call_stack, vec!["main@2".to_string()]);
        assert_eq!(vm.stack(), &[Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_stack_limit_holds_across_runs() {
        let config = VmConfig {
            max_stack_size: 2,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Value::Null, config, Vec::new());
        let mut b = ProgramBuilder::new();
        b.int(1);
        let (tape, pool) = b.into_parts();
        vm.register("push", tape, pool).unwrap();

        vm.run("push").unwrap();
        vm.run("push").unwrap();
        let err = vm.run("push").unwrap_err();

        assert!(matches!(err.kind, ErrorKind::StackOverflow { limit: 2 }));
        assert_eq!(vm.stack().len(), 2);
    }

    #[test]
    fn test_literal_outside_pool() {
        let program = Program::new(
            vec![Instruction::Int(LiteralIndex(3))].into_iter().collect(),
            LiteralPool::new(),
        );
        let err = literal(&program, LiteralIndex(3)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::IndexOutOfRange { index: 3, len: 0 }));
    }

    // ============================================================
    // Calls
    // ============================================================

    #[test]
    fn test_call_isolates_variables_and_shares_stack() {
        let mut vm = empty_vm();

        let mut b = ProgramBuilder::new();
        b.int(100).store_var("x").int(1).op(Instruction::Return).int(2);
        let (tape, pool) = b.into_parts();
        vm.register("helper", tape, pool).unwrap();

        let mut b = ProgramBuilder::new();
        b.int(5).store_var("x").call("helper").load_var("x");
        run_main(&mut vm, b).unwrap();

        assert_eq!(vm.stack(), &[Value::Int(1), Value::Int(5)]);
    }

    #[test]
    fn test_exit_inside_call_ends_run() {
        let mut vm = empty_vm();
        let mut b = ProgramBuilder::new();
        b.op(Instruction::Exit);
        let (tape, pool) = b.into_parts();
        vm.register("quit", tape, pool).unwrap();

        let mut b = ProgramBuilder::new();
        b.call("quit").int(1);
        run_main(&mut vm, b).unwrap();
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_call_errors_carry_call_stack() {
        let mut vm = empty_vm();
        let mut b = ProgramBuilder::new();
        b.op(Instruction::Print);
        let (tape, pool) = b.into_parts();
        vm.register("broken", tape, pool).unwrap();

        let mut b = ProgramBuilder::new();
        b.int(0).op(Instruction::Print).call("broken");
        let err = run_main(&mut vm, b).unwrap_err();

        assert!(matches!(err.kind, ErrorKind::StackUnderflow { .. }));
        assert_eq!(
            err.call_stack,
            vec!["broken@0".to_string(), "main@2".to_string()]
        );
    }

    #[test]
    fn test_call_unknown_program() {
        let err = run_ops(|b| {
            b.call("missing");
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownProgram(_)));
    }

    #[test]
    fn test_recursion_limit() {
        let config = VmConfig {
            max_call_depth: 8,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Value::Null, config, Vec::new());
        let mut b = ProgramBuilder::new();
        b.call("main");
        let err = run_main(&mut vm, b).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CallDepthExceeded { limit: 8, .. }));
        assert_eq!(err.call_stack.len(), 8);
    }

    // ============================================================
    // Local containers
    // ============================================================

    #[test]
    fn test_build_local_object() {
        assert_stack(
            |b| {
                b.op(Instruction::NewLocalObject)
                    .string("k")
                    .int(1)
                    .op(Instruction::Insert)
                    .string("list")
                    .op(Instruction::NewLocalArray)
                    .bool(true)
                    .op(Instruction::Append)
                    .op(Instruction::Insert);
            },
            vec![obj(vec![
                ("k", Value::Int(1)),
                ("list", Value::Array(vec![Value::Bool(true)])),
            ])],
        );
    }

    #[test]
    fn test_insert_duplicate_key() {
        let err = run_ops(|b| {
            b.op(Instruction::NewLocalObject)
                .string("k")
                .int(1)
                .op(Instruction::Insert)
                .string("k")
                .int(2)
                .op(Instruction::Insert);
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::KeyCollision(ref k) if k == "k"));
    }

    #[test]
    fn test_append_to_non_array() {
        let err = run_ops(|b| {
            b.int(1).int(2).op(Instruction::Append);
        })
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    // ============================================================
    // Cursor instructions
    // ============================================================

    fn city() -> Value {
        obj(vec![
            ("name", Value::from("lots")),
            (
                "features",
                Value::Array(vec![
                    obj(vec![("id", Value::Int(1))]),
                    obj(vec![("id", Value::Int(2))]),
                ]),
            ),
        ])
    }

    #[test]
    fn test_cd_and_load() {
        let mut vm = vm_over(city());
        let mut b = ProgramBuilder::new();
        b.cd(vec![Value::from("features"), Value::UInt(1), Value::from("id")])
            .op(Instruction::Load)
            .op(Instruction::Key);
        run_main(&mut vm, b).unwrap();

        assert_eq!(
            vm.stack(),
            &[Value::Int(2), Value::String("id".to_string())]
        );
        assert_eq!(vm.explorer().depth(), 3);
    }

    #[test]
    fn test_cd_path_not_found() {
        let mut vm = vm_over(city());
        let mut b = ProgramBuilder::new();
        b.cd(vec![Value::from("features"), Value::UInt(9)]);
        let err = run_main(&mut vm, b).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::PathNotFound { .. }));
        assert_eq!(vm.explorer().depth(), 1);
    }

    #[test]
    fn test_walk_and_rename() {
        let mut vm = vm_over(obj(vec![("a", Value::Int(1)), ("b", Value::Int(2))]));
        let mut b = ProgramBuilder::new();
        b.op(Instruction::Next)
            .store_var("ignored")
            .string("renamed")
            .op(Instruction::RenameKey)
            .op(Instruction::Next)
            .op(Instruction::AtEnd);
        run_main(&mut vm, b).unwrap();

        assert_eq!(vm.stack(), &[Value::Bool(true), Value::Bool(true)]);
        assert_eq!(
            vm.document().to_value(vm.document().root()),
            obj(vec![("a", Value::Int(1)), ("renamed", Value::Int(2))])
        );
    }

    #[test]
    fn test_rename_collision_keeps_document() {
        let doc = obj(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let mut vm = vm_over(doc.clone());
        let mut b = ProgramBuilder::new();
        b.string("b").op(Instruction::RenameKey);
        let err = run_main(&mut vm, b).unwrap_err();

        assert!(matches!(err.kind, ErrorKind::KeyCollision(_)));
        assert_eq!(vm.document().to_value(vm.document().root()), doc);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_delete_while_walking() {
        // drop every entry equal to 2; advance only when nothing was deleted
        let mut vm = vm_over(Value::Array(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(2),
        ]));
        let mut b = ProgramBuilder::new();
        b.bool(false).store_var("deleted");
        let start = b.loop_start();
        b.op(Instruction::AtEnd).bool(false).op(Instruction::Eq);
        let walk = b.begin_while();
        b.op(Instruction::Load).int(2).op(Instruction::Eq);
        let is_two = b.begin_if();
        b.op(Instruction::Delete).bool(true).store_var("deleted");
        b.end_if(is_two);
        b.load_var("deleted").bool(false).op(Instruction::Eq);
        let kept = b.begin_if();
        b.op(Instruction::Next).store_var("moved");
        b.end_if(kept);
        b.bool(false).store_var("deleted");
        b.end_while(start, walk);

        run_main(&mut vm, b).unwrap();

        assert_eq!(
            vm.document().to_value(vm.document().root()),
            Value::Array(vec![Value::Int(1), Value::Int(3)])
        );
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_enter_quit_and_load_at_end() {
        let mut vm = vm_over(Value::Array(vec![Value::Array(vec![])]));
        let mut b = ProgramBuilder::new();
        b.op(Instruction::Enter)
            .op(Instruction::AtEnd)
            .op(Instruction::Quit)
            .op(Instruction::AtEnd)
            .op(Instruction::Enter)
            .op(Instruction::Load);
        let err = run_main(&mut vm, b).unwrap_err();

        assert!(matches!(err.kind, ErrorKind::IndexOutOfRange { index: 0, len: 0 }));
        assert_eq!(vm.stack(), &[Value::Bool(true), Value::Bool(false)]);
    }

    #[test]
    fn test_key_in_array_is_none_key() {
        let mut vm = vm_over(Value::Array(vec![Value::Int(1)]));
        let mut b = ProgramBuilder::new();
        b.op(Instruction::Key).op(Instruction::Key).op(Instruction::Eq);
        run_main(&mut vm, b).unwrap();
        assert_eq!(vm.stack(), &[Value::Bool(true)]);
    }

    // ============================================================
    // Dump
    // ============================================================

    #[test]
    fn test_dump_unexecuted() {
        let vm = vm_over(obj(vec![
            ("a", Value::Int(1)),
            ("b", Value::Array(vec![Value::Int(2), Value::Int(3)])),
        ]));
        assert_eq!(dumped(&vm), "{ \"a\" : 1 \"b\" : [ 2 3 ] }\n");
    }

    #[test]
    fn test_dump_primitive_root() {
        let vm = vm_over(Value::from("just text"));
        assert_eq!(dumped(&vm), "\"just text\"\n");
    }

    #[test]
    fn test_dump_after_mutation_ignores_cursor_position() {
        let mut vm = vm_over(obj(vec![
            ("a", Value::Int(1)),
            ("b", Value::Array(vec![Value::Int(2), Value::Int(3)])),
        ]));
        let mut b = ProgramBuilder::new();
        b.cd(vec![Value::from("b"), Value::UInt(0)])
            .op(Instruction::Delete);
        run_main(&mut vm, b).unwrap();

        assert_eq!(dumped(&vm), "{ \"a\" : 1 \"b\" : [ 3 ] }\n");
        assert_eq!(vm.explorer().depth(), 2);
    }

    #[test]
    fn test_dump_nesting_too_deep() {
        let config = VmConfig {
            max_nesting_depth: 2,
            ..VmConfig::default()
        };
        let deep = Value::Array(vec![Value::Array(vec![Value::Array(vec![])])]);
        let vm = Vm::with_output(deep, config, Vec::new());
        let err = vm.dump(&mut Vec::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NestingTooDeep { limit: 2 }));
    }

    #[test]
    fn test_dump_json_nesting_too_deep() {
        let config = VmConfig {
            max_nesting_depth: 1,
            ..VmConfig::default()
        };
        let deep = Value::Array(vec![Value::Array(vec![Value::Array(vec![])])]);
        let vm = Vm::with_output(deep, config, Vec::new());

        let mut out = Vec::new();
        let err = vm.dump_json(&mut out).unwrap_err();

        assert!(matches!(err.kind, ErrorKind::NestingTooDeep { limit: 1 }));
        assert!(out.is_empty());
        assert!(vm.dump(&mut Vec::new()).is_err());
    }

    #[test]
    fn test_dump_json_at_depth_limit() {
        let config = VmConfig {
            max_nesting_depth: 3,
            ..VmConfig::default()
        };
        let deep = Value::Array(vec![Value::Array(vec![Value::Array(vec![])])]);
        let vm = Vm::with_output(deep, config, Vec::new());

        let mut out = Vec::new();
        vm.dump_json(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[[[]]]\n");
        assert!(vm.dump(&mut Vec::new()).is_ok());
    }

    #[test]
    fn test_dump_json() {
        let vm = vm_over(obj(vec![
            ("z", Value::Float(1.0)),
            ("a", Value::Array(vec![Value::Null])),
        ]));
        let mut out = Vec::new();
        vm.dump_json(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"z\":1.0,\"a\":[null]}\n");
    }
}
