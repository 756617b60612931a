//! Abstract syntax tree
//!
//! The lowering consumes this; the parser produces it. Every node
//! carries the span of its first token.

use crate::lexer::SourceSpan;

/// Reference to a type as written in source
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    /// Qualifying module name, for `Module.Type` references
    pub module: Option<String>,
    /// Type name
    pub name: String,
    /// Template arguments, for `Name<...>` references
    pub template_args: Vec<TypeRef>,
    /// Source location
    pub span: SourceSpan,
}

impl TypeRef {
    /// Unqualified, non-template reference
    pub fn plain(name: &str, span: SourceSpan) -> Self {
        Self {
            module: None,
            name: name.to_string(),
            template_args: Vec::new(),
            span,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `&&`
    LogicalAnd,
    /// `||`
    LogicalOr,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `~`
    BitNot,
    /// `++` (prefix)
    PreInc,
    /// `--` (prefix)
    PreDec,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// What kind of expression
    pub kind: ExprKind,
    /// Source location
    pub span: SourceSpan,
}

/// Expression variants
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal
    IntLit(u64),
    /// Float literal
    FloatLit(f64),
    /// String literal
    StrLit(String),
    /// Boolean literal
    BoolLit(bool),
    /// `null`
    NullLit,
    /// Name reference
    Ident(String),
    /// `this`
    This,
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        expr: Box<Expr>,
    },
    /// Assignment `target = value`
    Assign {
        /// Assignment destination
        target: Box<Expr>,
        /// Assigned value
        value: Box<Expr>,
    },
    /// Call `callee(args...)`
    Call {
        /// Called expression
        callee: Box<Expr>,
        /// Argument expressions
        args: Vec<Expr>,
    },
    /// Index `obj[index]`
    Index {
        /// Indexed expression
        obj: Box<Expr>,
        /// Index expression
        index: Box<Expr>,
    },
    /// Member access `obj.name`
    Member {
        /// Accessed expression
        obj: Box<Expr>,
        /// Member name
        name: String,
    },
    /// `new Type(args...)`
    New {
        /// Constructed type
        ty: TypeRef,
        /// Constructor arguments
        args: Vec<Expr>,
    },
    /// `cond ? then : other`
    Conditional {
        /// Condition
        cond: Box<Expr>,
        /// Value when true
        then: Box<Expr>,
        /// Value when false
        other: Box<Expr>,
    },
}

/// One function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub ty: TypeRef,
    /// Source location
    pub span: SourceSpan,
}

/// Function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Function name
    pub name: String,
    /// Parameters
    pub params: Vec<Param>,
    /// Declared return type; `None` means void
    pub ret: Option<TypeRef>,
    /// Body statements
    pub body: Vec<Stmt>,
    /// Declared with `export`
    pub exported: bool,
    /// Source location
    pub span: SourceSpan,
}

/// What role a class member function plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Ordinary method
    Normal,
    /// `constructor(...)`
    Constructor,
    /// `destructor()`
    Destructor,
}

/// A method inside a class body
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    /// The function declaration
    pub decl: FunctionDecl,
    /// Declared `static`
    pub is_static: bool,
    /// Constructor/destructor/normal
    pub kind: MethodKind,
}

/// A property inside a class body
#[derive(Debug, Clone, PartialEq)]
pub struct PropDecl {
    /// Property name
    pub name: String,
    /// Declared type
    pub ty: TypeRef,
    /// Declared `static`
    pub is_static: bool,
    /// Source location
    pub span: SourceSpan,
}

/// Class declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    /// Class name
    pub name: String,
    /// Inheritance bases
    pub bases: Vec<TypeRef>,
    /// Data members
    pub props: Vec<PropDecl>,
    /// Member functions; bodies are compiled after the class is declared
    pub methods: Vec<MethodDecl>,
    /// Declared with `export`
    pub exported: bool,
    /// Source location
    pub span: SourceSpan,
}

/// Statement node
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// What kind of statement
    pub kind: StmtKind,
    /// Source location
    pub span: SourceSpan,
}

/// Statement variants
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `import name;` / `import name as alias;`
    Import {
        /// Imported module name
        module: String,
        /// Local alias
        alias: Option<String>,
    },
    /// Function declaration
    Function(FunctionDecl),
    /// Class declaration
    Class(ClassDecl),
    /// `format Name { field: type; ... }` - a POD struct
    Format {
        /// Format name
        name: String,
        /// Ordered fields
        fields: Vec<(String, TypeRef)>,
        /// Declared with `export`
        exported: bool,
    },
    /// `enum Name { A, B = 3, ... }`
    Enum {
        /// Enum name
        name: String,
        /// Variants with optional explicit values
        variants: Vec<(String, Option<i64>)>,
        /// Declared with `export`
        exported: bool,
    },
    /// `let name : type = init;`
    Let {
        /// Variable name
        name: String,
        /// Declared type, if written
        ty: Option<TypeRef>,
        /// Initializer, if written
        init: Option<Expr>,
        /// Declared with `const`
        is_const: bool,
    },
    /// `return expr?;`
    Return(Option<Expr>),
    /// `delete expr;`
    Delete(Expr),
    /// `if (cond) then else other`
    If {
        /// Condition
        cond: Expr,
        /// Then branch
        then: Box<Stmt>,
        /// Else branch
        other: Option<Box<Stmt>>,
    },
    /// `while (cond) body`
    While {
        /// Condition
        cond: Expr,
        /// Loop body
        body: Box<Stmt>,
    },
    /// `do body while (cond);`
    DoWhile {
        /// Loop body
        body: Box<Stmt>,
        /// Condition
        cond: Expr,
    },
    /// `for (init; cond; step) body`
    For {
        /// Initializer statement
        init: Option<Box<Stmt>>,
        /// Condition
        cond: Option<Expr>,
        /// Step expression
        step: Option<Expr>,
        /// Loop body
        body: Box<Stmt>,
    },
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// Expression statement
    Expr(Expr),
}

/// A parsed compilation unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    /// Top-level statements in source order
    pub stmts: Vec<Stmt>,
}
