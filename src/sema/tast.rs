//! Typed tree produced by semantic analysis
//!
//! Every expression carries an [`ExprType`] and a [`ValueCategory`]. An
//! expression that involves a name resolved only at run time is *dependent*:
//! its type and category are unknown at compile time. Dependence propagates
//! upward through operators until something with a known result type (a cast,
//! a call to a known function, a statement boundary) absorbs it.
//!
//! Locals are numbered per function; block scoping is resolved here, so later
//! stages only see [`LocalId`]s.

use crate::deferred::InterpreterId;
use crate::parser::ast::{BinOp, SourceLocation, Type, UnOp};
use crate::session::ContextToken;

pub type LocalId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprType {
    Known(Type),
    Dependent,
}

impl ExprType {
    pub fn known(&self) -> Option<&Type> {
        match self {
            ExprType::Known(ty) => Some(ty),
            ExprType::Dependent => None,
        }
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self, ExprType::Dependent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCategory {
    RValue,
    LValue,
    Dependent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: ExprType,
    pub category: ValueCategory,
    pub location: SourceLocation,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, category: ValueCategory, location: SourceLocation) -> Self {
        Expr {
            kind,
            ty: ExprType::Known(ty),
            category,
            location,
        }
    }

    pub fn dependent(kind: ExprKind, location: SourceLocation) -> Self {
        Expr {
            kind,
            ty: ExprType::Dependent,
            category: ValueCategory::Dependent,
            location,
        }
    }

    /// Dependent only because a name is resolved at run time: both the type
    /// and the value category are unknown.
    pub fn is_artificially_dependent(&self) -> bool {
        self.ty.is_dependent() && self.category == ValueCategory::Dependent
    }

    pub fn is_lvalue(&self) -> bool {
        self.category == ValueCategory::LValue
    }

    pub fn known_type(&self) -> Option<&Type> {
        self.ty.known()
    }

    /// Literal `0` or `NULL`
    pub fn is_null_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Null | ExprKind::IntConst(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Printf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A function compiled from source
    Function,
    Builtin(Builtin),
    /// A host function bound into the loader
    Host,
    /// A name that will be resolved when the call is evaluated
    Placeholder,
}

/// Call back into the interpreter to compile and run `text` at run time
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEvalCall {
    pub interpreter: InterpreterId,
    /// Expression source with `@N` marking the Nth captured address
    pub text: String,
    /// Lvalues whose addresses are passed, in `@N` order
    pub captures: Vec<Expr>,
    pub context: ContextToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer constant typed `int` or `long`
    IntConst(i64),
    CharConst(i8),
    Str(String),
    Null,
    Global(String),
    Local {
        id: LocalId,
        name: String,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs op= rhs`; `op` is the arithmetic operator
    CompoundAssign {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        target: CallTarget,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
        arrow: bool,
    },
    Cast {
        to: Type,
        expr: Box<Expr>,
    },
    RuntimeEval(RuntimeEvalCall),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Initializer>, SourceLocation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Local {
        id: LocalId,
        init: Option<Initializer>,
        location: SourceLocation,
    },
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        location: SourceLocation,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        location: SourceLocation,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
        location: SourceLocation,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
        location: SourceLocation,
    },
    Return {
        value: Option<Expr>,
        location: SourceLocation,
    },
    Break(SourceLocation),
    Continue(SourceLocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// `Dependent` when a statement function returns a runtime-resolved value
    pub return_type: ExprType,
    /// Parameters are locals `0..params`
    pub params: usize,
    pub locals: Vec<LocalVar>,
    pub body: Vec<Stmt>,
    pub location: SourceLocation,
    /// Synthesized wrapper around a fragment's statements
    pub is_statement_body: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Type,
    pub init: Option<Initializer>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(Function),
    Global(GlobalVar),
}
