// =============================================================================
// INSTRUCTION - one tape entry, opcode plus its typed operand
// =============================================================================

/// Index into a program's literal pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiteralIndex(pub usize);

/// Absolute position on a program's tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TapeOffset(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    // control
    /// Stop the whole run.
    Exit,
    /// End the current activation. At top level this ends the run.
    Return,

    // literals: push a copy of the pool entry, whose tag must match
    Int(LiteralIndex),
    UInt(LiteralIndex),
    Float(LiteralIndex),
    String(LiteralIndex),
    Bool(LiteralIndex),
    Null(LiteralIndex),

    // arithmetic
    Add, // ( x y -- x+y )

    // comparison
    Eq,    // ( x y -- bool )
    NotEq, // ( x y -- bool )

    // I/O
    Print, // ( v -- )

    // variables, named by a string literal
    LoadVar(LiteralIndex),  // ( -- v )
    StoreVar(LiteralIndex), // ( v -- )

    // ==========================================================================
    // Structured control flow
    // ==========================================================================
    /// Pop a bool; on false continue after the `CondEnd` at the target.
    If(TapeOffset),

    /// Pop a bool; on false continue after the `CondEnd` at the target.
    /// The matching `CondEnd` loops back to the condition code.
    While(TapeOffset),

    /// Closes an `If` (no operand) or a `While` (jump back to the start of
    /// the loop condition).
    CondEnd(Option<TapeOffset>),

    // detached containers
    NewLocalArray,  // ( -- [] )
    NewLocalObject, // ( -- {} )
    Append,         // ( arr v -- arr )
    Insert,         // ( obj key v -- obj )

    // ==========================================================================
    // Cursor
    // ==========================================================================
    /// Move the cursor to the path literal (array of keys / indices).
    Cd(LiteralIndex),
    Enter,
    Quit,
    Next,      // ( -- bool )
    AtEnd,     // ( -- bool )
    Load,      // ( -- v )
    Key,       // ( -- key )
    RenameKey, // ( key -- )
    Delete,

    /// Run the program named by a string literal as a new activation.
    Call(LiteralIndex),
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Exit => "EXIT",
            Instruction::Return => "RETURN",
            Instruction::Int(_) => "INT",
            Instruction::UInt(_) => "UINT",
            Instruction::Float(_) => "FLOAT",
            Instruction::String(_) => "STRING",
            Instruction::Bool(_) => "BOOL",
            Instruction::Null(_) => "NULL",
            Instruction::Add => "ADD",
            Instruction::Eq => "EQ",
            Instruction::NotEq => "NOTEQ",
            Instruction::Print => "PRINT",
            Instruction::LoadVar(_) => "VARIABLE",
            Instruction::StoreVar(_) => "STORE_VARIABLE",
            Instruction::If(_) => "IF",
            Instruction::While(_) => "WHILE",
            Instruction::CondEnd(_) => "COND_END",
            Instruction::NewLocalArray => "NEW_LOCAL_ARRAY",
            Instruction::NewLocalObject => "NEW_LOCAL_OBJECT",
            Instruction::Append => "APPEND",
            Instruction::Insert => "INSERT",
            Instruction::Cd(_) => "CD",
            Instruction::Enter => "ENTER",
            Instruction::Quit => "QUIT",
            Instruction::Next => "NEXT",
            Instruction::AtEnd => "AT_END",
            Instruction::Load => "LOAD",
            Instruction::Key => "KEY",
            Instruction::RenameKey => "RENAME_KEY",
            Instruction::Delete => "DELETE",
            Instruction::Call(_) => "CALL",
        }
    }

    /// Literal pool operand, if the instruction has one.
    pub fn literal(&self) -> Option<LiteralIndex> {
        match self {
            Instruction::Int(idx)
            | Instruction::UInt(idx)
            | Instruction::Float(idx)
            | Instruction::String(idx)
            | Instruction::Bool(idx)
            | Instruction::Null(idx)
            | Instruction::LoadVar(idx)
            | Instruction::StoreVar(idx)
            | Instruction::Cd(idx)
            | Instruction::Call(idx) => Some(*idx),
            _ => None,
        }
    }

    /// Type name a literal-push instruction requires of its pool entry.
    pub fn literal_type(&self) -> Option<&'static str> {
        match self {
            Instruction::Int(_) => Some("int"),
            Instruction::UInt(_) => Some("uint"),
            Instruction::Float(_) => Some("float"),
            Instruction::String(_) => Some("string"),
            Instruction::Bool(_) => Some("bool"),
            Instruction::Null(_) => Some("null"),
            _ => None,
        }
    }

    pub fn jump_target(&self) -> Option<TapeOffset> {
        match self {
            Instruction::If(target) | Instruction::While(target) => Some(*target),
            Instruction::CondEnd(back) => *back,
            _ => None,
        }
    }
}
