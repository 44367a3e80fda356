// AST (Abstract Syntax Tree) definitions for the incremental C front end

use std::fmt;

/// Source location information for error reporting
///
/// `offset` is the byte offset of the token within the parsed text; the
/// source wrapper uses it to slice statements back out verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            offset: 0,
        }
    }

    pub fn at(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Half-open byte range `[start, end)` within the parsed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Slice the spanned text out of `source`.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Base types supported by the front end
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BaseType {
    Int,
    Long,
    Char,
    Void,
    Struct(String), // Struct name
}

/// Type representation with const qualifier, pointers, and arrays
///
/// `int *a[3]` is an array of three `int *`: `pointer_depth` applies to the
/// element type and `array_dims` wraps it outermost-first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub base: BaseType,
    pub is_const: bool,
    pub pointer_depth: usize, // 0 = not pointer, 1 = *, 2 = **, etc.
    pub array_dims: Vec<Option<usize>>, // None for unsized dimension
}

impl Type {
    pub fn new(base: BaseType) -> Self {
        Type {
            base,
            is_const: false,
            pointer_depth: 0,
            array_dims: Vec::new(),
        }
    }

    pub fn int() -> Self {
        Type::new(BaseType::Int)
    }

    pub fn long() -> Self {
        Type::new(BaseType::Long)
    }

    pub fn char() -> Self {
        Type::new(BaseType::Char)
    }

    pub fn void() -> Self {
        Type::new(BaseType::Void)
    }

    pub fn with_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn with_pointer(mut self) -> Self {
        self.pointer_depth += 1;
        self
    }

    pub fn with_array(mut self, size: Option<usize>) -> Self {
        self.array_dims.push(size);
        self
    }

    pub fn is_array(&self) -> bool {
        !self.array_dims.is_empty()
    }

    pub fn is_pointer(&self) -> bool {
        self.array_dims.is_empty() && self.pointer_depth > 0
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void && self.pointer_depth == 0 && self.array_dims.is_empty()
    }

    pub fn is_void_pointer(&self) -> bool {
        self.base == BaseType::Void && self.pointer_depth == 1 && self.array_dims.is_empty()
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.base, BaseType::Struct(_))
            && self.pointer_depth == 0
            && self.array_dims.is_empty()
    }

    pub fn is_integer(&self) -> bool {
        self.pointer_depth == 0
            && self.array_dims.is_empty()
            && matches!(self.base, BaseType::Int | BaseType::Long | BaseType::Char)
    }

    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_pointer()
    }

    /// Name of the struct this type is, or points to.
    pub fn struct_name(&self) -> Option<&str> {
        match &self.base {
            BaseType::Struct(name) => Some(name),
            _ => None,
        }
    }

    /// The type without its outermost array dimension.
    pub fn element(&self) -> Type {
        let mut element = self.clone();
        if !element.array_dims.is_empty() {
            element.array_dims.remove(0);
        }
        element
    }

    /// The type a pointer of this type points to.
    pub fn pointee(&self) -> Type {
        let mut pointee = self.clone();
        pointee.pointer_depth = pointee.pointer_depth.saturating_sub(1);
        pointee
    }

    /// Pointer to this type. Arrays of arrays have no representation as
    /// pointer-to-array, so callers check `array_dims.len() <= 1` first.
    pub fn address_of(&self) -> Type {
        self.clone().with_pointer()
    }

    /// Array-to-pointer decay for one-dimensional arrays.
    pub fn decay(&self) -> Type {
        if self.array_dims.len() == 1 {
            let mut decayed = self.element();
            decayed.pointer_depth += 1;
            decayed
        } else {
            self.clone()
        }
    }

    pub fn unqualified(&self) -> Type {
        let mut ty = self.clone();
        ty.is_const = false;
        ty
    }

    /// Render a declaration of `name` with this type, e.g. `int a[3]`.
    pub fn declare(&self, name: &str) -> String {
        let mut out = format!("{}{}", self.base_text(), "*".repeat(self.pointer_depth));
        if self.pointer_depth == 0 {
            out.push(' ');
        }
        out.push_str(name);
        for dim in &self.array_dims {
            match dim {
                Some(n) => out.push_str(&format!("[{}]", n)),
                None => out.push_str("[]"),
            }
        }
        out
    }

    fn base_text(&self) -> String {
        let base = match &self.base {
            BaseType::Int => "int".to_string(),
            BaseType::Long => "long".to_string(),
            BaseType::Char => "char".to_string(),
            BaseType::Void => "void".to_string(),
            BaseType::Struct(name) => format!("struct {}", name),
        };
        let base = if self.is_const {
            format!("const {}", base)
        } else {
            base
        };
        if self.pointer_depth > 0 {
            format!("{} ", base)
        } else {
            base
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_text().trim_end())?;
        if self.pointer_depth > 0 {
            write!(f, " {}", "*".repeat(self.pointer_depth))?;
        }
        for dim in &self.array_dims {
            match dim {
                Some(n) => write!(f, "[{}]", n)?,
                None => write!(f, "[]")?,
            }
        }
        Ok(())
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    BitShl,
    BitShr,
    // Compound assignment
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
}

impl BinOp {
    /// The C spelling of this operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitShl => "<<",
            BinOp::BitShr => ">>",
            BinOp::AddAssign => "+=",
            BinOp::SubAssign => "-=",
            BinOp::MulAssign => "*=",
            BinOp::DivAssign => "/=",
            BinOp::ModAssign => "%=",
        }
    }

    /// The arithmetic operator a compound assignment applies.
    pub fn arithmetic(self) -> BinOp {
        match self {
            BinOp::AddAssign => BinOp::Add,
            BinOp::SubAssign => BinOp::Sub,
            BinOp::MulAssign => BinOp::Mul,
            BinOp::DivAssign => BinOp::Div,
            BinOp::ModAssign => BinOp::Mod,
            other => other,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,     // -x
    Not,     // !x
    BitNot,  // ~x
    PreInc,  // ++x
    PreDec,  // --x
    PostInc, // x++
    PostDec, // x--
    Deref,   // *x
    AddrOf,  // &x
}

/// Function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub param_type: Type,
}

/// Struct field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: Type,
}

/// Struct definition
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Field>,
}

/// AST nodes representing statements and expressions
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    // Top-level declarations
    /// A function definition, or a prototype when `body` is `None`.
    FunctionDef {
        name: String,
        params: Vec<Param>,
        body: Option<Vec<AstNode>>,
        return_type: Type,
        location: SourceLocation,
    },
    StructDef {
        name: String,
        fields: Vec<Field>,
        location: SourceLocation,
    },
    /// `#include "path"`; `system` is set for the `<path>` form.
    Include {
        path: String,
        system: bool,
        location: SourceLocation,
    },

    // Statements
    VarDecl {
        name: String,
        var_type: Type,
        init: Option<Box<AstNode>>,
        location: SourceLocation,
    },
    Return {
        expr: Option<Box<AstNode>>,
        location: SourceLocation,
    },
    If {
        condition: Box<AstNode>,
        then_branch: Vec<AstNode>,
        else_branch: Option<Vec<AstNode>>,
        location: SourceLocation,
    },
    While {
        condition: Box<AstNode>,
        body: Vec<AstNode>,
        location: SourceLocation,
    },
    DoWhile {
        body: Vec<AstNode>,
        condition: Box<AstNode>,
        location: SourceLocation,
    },
    For {
        init: Option<Box<AstNode>>,
        condition: Option<Box<AstNode>>,
        increment: Option<Box<AstNode>>,
        body: Vec<AstNode>,
        location: SourceLocation,
    },
    Break {
        location: SourceLocation,
    },
    Continue {
        location: SourceLocation,
    },
    Block {
        statements: Vec<AstNode>,
        location: SourceLocation,
    },
    ExpressionStatement {
        expr: Box<AstNode>,
        location: SourceLocation,
    },

    // Expressions
    IntLiteral(i32, SourceLocation),
    LongLiteral(i64, SourceLocation),
    CharLiteral(i8, SourceLocation),
    StringLiteral(String, SourceLocation),
    Null {
        location: SourceLocation,
    },
    Variable(String, SourceLocation),
    Assignment {
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
        location: SourceLocation,
    },
    CompoundAssignment {
        lhs: Box<AstNode>,
        op: BinOp,
        rhs: Box<AstNode>,
        location: SourceLocation,
    },
    BinaryOp {
        op: BinOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
        location: SourceLocation,
    },
    UnaryOp {
        op: UnOp,
        operand: Box<AstNode>,
        location: SourceLocation,
    },
    TernaryOp {
        condition: Box<AstNode>,
        true_expr: Box<AstNode>,
        false_expr: Box<AstNode>,
        location: SourceLocation,
    },
    FunctionCall {
        name: String,
        args: Vec<AstNode>,
        location: SourceLocation,
    },
    ArrayAccess {
        array: Box<AstNode>,
        index: Box<AstNode>,
        location: SourceLocation,
    },
    MemberAccess {
        object: Box<AstNode>,
        member: String,
        location: SourceLocation,
    },
    PointerMemberAccess {
        object: Box<AstNode>,
        member: String,
        location: SourceLocation,
    },
    Cast {
        target_type: Type,
        expr: Box<AstNode>,
        location: SourceLocation,
    },
    SizeofType {
        target_type: Type,
        location: SourceLocation,
    },
    SizeofExpr {
        expr: Box<AstNode>,
        location: SourceLocation,
    },
    /// Brace-enclosed aggregate initializer: `{1, 2, {3, 4}}`
    InitList {
        items: Vec<AstNode>,
        location: SourceLocation,
    },
}

impl AstNode {
    /// Get the source location of this node
    pub fn location(&self) -> &SourceLocation {
        match self {
            AstNode::FunctionDef { location, .. } => location,
            AstNode::StructDef { location, .. } => location,
            AstNode::Include { location, .. } => location,
            AstNode::VarDecl { location, .. } => location,
            AstNode::Return { location, .. } => location,
            AstNode::If { location, .. } => location,
            AstNode::While { location, .. } => location,
            AstNode::DoWhile { location, .. } => location,
            AstNode::For { location, .. } => location,
            AstNode::Break { location, .. } => location,
            AstNode::Continue { location, .. } => location,
            AstNode::Block { location, .. } => location,
            AstNode::ExpressionStatement { location, .. } => location,
            AstNode::IntLiteral(_, loc) => loc,
            AstNode::LongLiteral(_, loc) => loc,
            AstNode::CharLiteral(_, loc) => loc,
            AstNode::StringLiteral(_, loc) => loc,
            AstNode::Null { location } => location,
            AstNode::Variable(_, loc) => loc,
            AstNode::Assignment { location, .. } => location,
            AstNode::CompoundAssignment { location, .. } => location,
            AstNode::BinaryOp { location, .. } => location,
            AstNode::UnaryOp { location, .. } => location,
            AstNode::TernaryOp { location, .. } => location,
            AstNode::FunctionCall { location, .. } => location,
            AstNode::ArrayAccess { location, .. } => location,
            AstNode::MemberAccess { location, .. } => location,
            AstNode::PointerMemberAccess { location, .. } => location,
            AstNode::Cast { location, .. } => location,
            AstNode::SizeofType { location, .. } => location,
            AstNode::SizeofExpr { location, .. } => location,
            AstNode::InitList { location, .. } => location,
        }
    }
}

/// Top-level program structure
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub nodes: Vec<AstNode>, // FunctionDef, StructDef, VarDecl, Include
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }
}

/// One top-level item of a wrapped fragment, with the byte span it came from
#[derive(Debug, Clone)]
pub struct FragmentItem {
    /// Declarators of a multi-variable declaration produce several nodes
    /// sharing one span.
    pub nodes: Vec<AstNode>,
    pub span: Span,
    /// False only for a final expression statement or declaration that is
    /// missing its `;`.
    pub terminated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::int().to_string(), "int");
        assert_eq!(Type::char().with_const().with_pointer().to_string(), "const char *");
        assert_eq!(
            Type::new(BaseType::Struct("P".into())).with_pointer().with_pointer().to_string(),
            "struct P **"
        );
        assert_eq!(Type::int().with_array(Some(3)).to_string(), "int[3]");
    }

    #[test]
    fn test_type_declare() {
        assert_eq!(Type::int().with_array(Some(2)).with_array(Some(3)).declare("m"), "int m[2][3]");
        assert_eq!(Type::char().with_pointer().declare("s"), "char *s");
        assert_eq!(Type::long().declare("n"), "long n");
    }

    #[test]
    fn test_decay_and_element() {
        let arr = Type::int().with_array(Some(4));
        assert_eq!(arr.decay(), Type::int().with_pointer());
        assert_eq!(arr.element(), Type::int());
        let ptr = Type::int().with_pointer();
        assert_eq!(ptr.pointee(), Type::int());
        assert!(ptr.is_scalar());
        assert!(!arr.is_scalar());
    }
}
