//! Abstract Syntax Tree definitions for KnitScript programs

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::machine::carriage_pass::NeedleInstruction;
use crate::machine::needle::{Bed, Needle};

/// Where a statement came from: file, line, and the source line itself
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub file: Option<Arc<str>>,
    pub line: usize,
    pub excerpt: String,
}

impl Location {
    pub fn new(file: Option<Arc<str>>, line: usize, excerpt: impl Into<String>) -> Self {
        Self {
            file,
            line,
            excerpt: excerpt.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => write!(f, "<source>:{}", self.line),
        }
    }
}

/// A complete program consisting of statements
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

/// A statement with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: Location,
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(String),
    /// `name[index] = value`
    Index { name: String, index: Expr },
}

/// Function parameter with an optional default
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Horizontal direction of a shifted transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// How an xfer or split pass chooses its destination needles
#[derive(Debug, Clone, PartialEq)]
pub enum XferRacking {
    /// `across`: the needle directly opposite
    Across,
    /// `2 to Right`: the opposite needle offset along the bed
    Shift { distance: Expr, side: Side },
    /// `xfer f0 b1`: an explicit destination at the current racking
    Target(Expr),
}

/// Layer movement of a `push` statement
#[derive(Debug, Clone, PartialEq)]
pub enum PushKind {
    Forward(Expr),
    Backward(Expr),
    ToFront,
    ToBack,
    ToLayer(Expr),
}

/// Layer exchange of a `swap` statement
#[derive(Debug, Clone, PartialEq)]
pub enum SwapKind {
    /// Swap with whichever position of the group holds this layer
    Layer(Expr),
    /// Swap with the position of this sheet in the same group
    Sheet(Expr),
}

/// `knit f1, f2;` inside an in-direction block
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionLine {
    pub instruction: Expr,
    pub needles: Vec<Expr>,
}

/// Statement kinds
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `x = e;` or `a, b = e;`
    Assignment { targets: Vec<AssignTarget>, value: Expr },
    /// `global x = e;`
    Declaration { name: String, value: Expr },
    Expression(Expr),
    If {
        branches: Vec<(Expr, Vec<Statement>)>,
        otherwise: Option<Vec<Statement>>,
    },
    While { condition: Expr, body: Vec<Statement> },
    For {
        variables: Vec<String>,
        iterable: Expr,
        body: Vec<Statement>,
    },
    Try {
        body: Vec<Statement>,
        filters: Vec<String>,
        binding: Option<String>,
        handler: Vec<Statement>,
    },
    /// `with Carrier as c1, Racking as 1: { ... }`
    With {
        assignments: Vec<(String, Expr)>,
        body: Vec<Statement>,
    },
    FunctionDef {
        name: String,
        params: Vec<Param>,
        body: Rc<Vec<Statement>>,
    },
    Return(Option<Expr>),
    Print(Expr),
    Assert { condition: Expr, message: Option<Expr> },
    Pause,
    Import { path: Vec<String>, alias: Option<String> },
    /// Outhook the listed carriers, or the scope carrier when empty
    Cut(Vec<Expr>),
    /// Take the listed carriers out without cutting
    Remove(Vec<Expr>),
    ReleaseHook,
    Push { needles: Vec<Expr>, push: PushKind },
    Swap { needles: Vec<Expr>, swap: SwapKind },
    DropPass(Vec<Expr>),
    XferPass {
        needles: Vec<Expr>,
        racking: XferRacking,
        target_bed: Option<Bed>,
        to_sliders: bool,
        /// Present for `split`: `None` uses the scope carrier
        split: Option<Option<Expr>>,
    },
    InDirection {
        direction: Expr,
        lines: Vec<InstructionLine>,
    },
    Block(Vec<Statement>),
}

/// Direction keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionKeyword {
    Leftward,
    Rightward,
    /// The scope's current direction
    Current,
    /// The opposite of the scope's current direction
    Reverse,
    Decreasing,
    Increasing,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Is,
    In,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Is => "is",
            BinaryOp::In => "in",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Piece of an f-string
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr(Expr),
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FStringPart>),
    Variable(String),

    /// Needle literal, addressed on the current sheet
    Needle(Needle),

    /// Carrier literal: `c3`
    Carrier(u32),

    /// Sheet literal: `s1` or `s1:g2`
    Sheet { sheet: u32, gauge: Option<u32> },

    Direction(DirectionKeyword),
    Instruction(NeedleInstruction),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),

    /// `[element for a, b in iterable if condition]`
    ListComprehension {
        element: Box<Expr>,
        variables: Vec<String>,
        iterable: Box<Expr>,
        condition: Option<Box<Expr>>,
    },

    /// `{key: value for a in iterable if condition}`
    DictComprehension {
        key: Box<Expr>,
        value: Box<Expr>,
        variables: Vec<String>,
        iterable: Box<Expr>,
        condition: Option<Box<Expr>>,
    },

    Call {
        function: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute { object: Box<Expr>, name: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }
}
