//! Module IR executed by the virtual machine
//!
//! Names are resolved away during lowering: locals are frame slot indices,
//! globals are indices into the module's slot table, struct members and
//! array elements are byte offsets. Every expression node carries the
//! source location runtime errors are reported at.

use crate::deferred::InterpreterId;
use crate::memory::value::{Address, Value};
use crate::memory::MemType;
use crate::parser::ast::{SourceLocation, Type};
use crate::session::ContextToken;
use std::rc::Rc;

/// One fragment's generated code and data
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub fragment: usize,
    pub globals: Vec<GlobalSlot>,
    /// String literals, placed in the global segment at load time
    pub strings: Vec<String>,
    pub functions: Vec<Rc<Function>>,
}

impl Module {
    pub fn new(name: impl Into<String>, fragment: usize) -> Self {
        Module {
            name: name.into(),
            fragment,
            globals: Vec::new(),
            strings: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn global(&self, name: &str) -> Option<&GlobalSlot> {
        self.globals.iter().find(|slot| slot.name == name)
    }

    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|slot| slot.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&Rc<Function>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A global this module defines or refers to
#[derive(Debug, Clone)]
pub struct GlobalSlot {
    pub name: String,
    pub ty: Type,
    pub size: usize,
    /// Storage is allocated by this module (otherwise it must be bound)
    pub defined: bool,
    /// Address spliced from an earlier module
    pub binding: Option<Address>,
    pub init: Vec<InitStore>,
    pub location: SourceLocation,
}

/// Store of `value` at `offset` bytes into an object
#[derive(Debug, Clone)]
pub struct InitStore {
    pub offset: usize,
    pub mem: MemType,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct LocalSlot {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Layout of each parameter; parameters occupy the first local slots
    pub params: Vec<MemType>,
    pub locals: Vec<LocalSlot>,
    /// `None` for `void`, and for a statement body whose result type is
    /// only known at run time (the value is returned as produced)
    pub returns: Option<MemType>,
    pub body: Vec<Stmt>,
    pub location: SourceLocation,
}

impl Function {
    pub fn local_sizes(&self) -> Vec<usize> {
        self.locals.iter().map(|l| l.size).collect()
    }
}

#[derive(Debug, Clone)]
pub enum Place {
    Global(usize),
    Local(usize),
    /// Computed address
    Addr(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::BitAnd => "&",
            ArithOp::BitOr => "|",
            ArithOp::BitXor => "^",
            ArithOp::Shl => "<<",
            ArithOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: SourceLocation,
}

impl Expr {
    pub fn new(kind: ExprKind, location: SourceLocation) -> Self {
        Expr { kind, location }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Const(Value),
    /// Address of string literal N of the module
    Str(usize),
    Load(Place, MemType),
    AddrOf(Place),
    Neg(Box<Expr>, MemType),
    BitNot(Box<Expr>, MemType),
    Not(Box<Expr>),
    /// Integer arithmetic in `width` (`Int` or `Long`), overflow-checked
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        width: MemType,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Short-circuit `&&` (`and`) or `||`
    Logical {
        and: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `ptr + offset * scale`
    PtrAdd {
        ptr: Box<Expr>,
        offset: Box<Expr>,
        scale: usize,
    },
    /// `(lhs - rhs) / scale`
    PtrDiff {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        scale: usize,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Convert(Box<Expr>, MemType),
    /// Store and yield the stored value
    Store {
        place: Place,
        mem: MemType,
        value: Box<Expr>,
    },
    /// Read-modify-write: `place = place op rhs`. With `scale` the update is
    /// pointer arithmetic. `post` yields the old value.
    Update {
        place: Place,
        mem: MemType,
        op: ArithOp,
        rhs: Box<Expr>,
        scale: Option<usize>,
        post: bool,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    HostCall {
        name: String,
        args: Vec<Expr>,
    },
    Printf {
        args: Vec<Expr>,
    },
    /// Hand `text` back to the interpreter with the addresses of `captures`
    RuntimeEval {
        interpreter: InterpreterId,
        text: String,
        captures: Vec<Expr>,
        context: ContextToken,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    /// Zero-fill local `local` and apply `stores` relative to its address
    InitLocal {
        local: usize,
        size: usize,
        stores: Vec<InitStore>,
    },
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
}
