//! AST produced by the parser. The decorator classifier and every later pass consumes this
//! tree exclusively; nothing downstream re-reads source text.

use crate::error::Span;

#[derive(Debug, Clone)]
pub struct Module {
    pub decls: Vec<TopLevelDecl>,
}

#[derive(Debug, Clone)]
pub struct TopLevelDecl {
    pub span: Span,
    pub decorators: Vec<Decorator>,
    pub kind: DeclKind,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Function(FunctionDef),
    Class(ClassDef),
}

/// A decorator, e.g. `@map`, `@section("xdp")`, `@struct`.
#[derive(Debug, Clone)]
pub struct Decorator {
    pub span: Span,
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub return_annotation: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// An annotated field in a `@struct`-tagged class body: `name: annotation`.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub span: Span,
    pub name: String,
    pub annotation: TypeAnnotation,
}

/// A type annotation as written in source: either a bare name (`c_uint64`) or a parameterized
/// `str(N)` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Name(String),
    Str(u32),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        span: Span,
        target: AssignTarget,
        value: Expr,
    },
    Expr {
        span: Span,
        value: Expr,
    },
    If {
        span: Span,
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Return {
        span: Span,
        value: Option<Expr>,
    },
    Pass {
        span: Span,
    },
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Attribute { base: String, field: String },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Name {
        span: Span,
        id: String,
    },
    Int {
        span: Span,
        value: i64,
    },
    Bool {
        span: Span,
        value: bool,
    },
    Str {
        span: Span,
        value: String,
    },
    /// An f-string: a sequence of literal text fragments and interpolated expressions, in
    /// source order. `JoinedStr` in the reference implementation's AST vocabulary.
    FString {
        span: Span,
        parts: Vec<FStringPart>,
    },
    Call {
        span: Span,
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        span: Span,
        base: Box<Expr>,
        field: String,
    },
    BinOp {
        span: Span,
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        span: Span,
        op: CmpOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Name { span, .. }
            | Expr::Int { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Str { span, .. }
            | Expr::FString { span, .. }
            | Expr::Call { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::Compare { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Interp(Expr),
}

#[derive(Debug, Clone)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl TopLevelDecl {
    pub fn name(&self) -> &str {
        match &self.kind {
            DeclKind::Function(f) => &f.name,
            DeclKind::Class(c) => &c.name,
        }
    }

    pub fn decorator_named(&self, name: &str) -> Option<&Decorator> {
        self.decorators.iter().find(|d| d.name == name)
    }

    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorator_named(name).is_some()
    }
}
