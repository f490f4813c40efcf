// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Syntax tree for the shader subset.
//!
//! The parser produces the tree with unresolved annotations; the checker fills in expression
//! types, local slots, call targets and member accesses in place.  The interpreter only runs
//! checked trees.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Pos {
    pub(crate) line: u32,
    pub(crate) col: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Scalar {
    Bool,
    Int,
    Uint,
    Float,
}

impl Scalar {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::Int => "int",
            Scalar::Uint => "uint",
            Scalar::Float => "float",
        }
    }

    /// The usual arithmetic conversions: float beats uint beats int.  bool promotes to int.
    pub(crate) fn common(a: Scalar, b: Scalar) -> Scalar {
        match (a, b) {
            (Scalar::Float, _) | (_, Scalar::Float) => Scalar::Float,
            (Scalar::Uint, _) | (_, Scalar::Uint) => Scalar::Uint,
            _ => Scalar::Int,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AddressSpace {
    Device,
    Constant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Type {
    Void,
    Scalar(Scalar),
    Vector(Scalar, u8),
    /// Index into [`Module::structs`].
    Struct(usize),
    Pointer {
        space: AddressSpace,
        is_const: bool,
        pointee: Box<Type>,
    },
}

impl Type {
    pub(crate) const FLOAT: Type = Type::Scalar(Scalar::Float);
    pub(crate) const UINT: Type = Type::Scalar(Scalar::Uint);
    pub(crate) const INT: Type = Type::Scalar(Scalar::Int);
    pub(crate) const BOOL: Type = Type::Scalar(Scalar::Bool);

    pub(crate) fn scalar(&self) -> Option<Scalar> {
        match self {
            Type::Scalar(s) | Type::Vector(s, _) => Some(*s),
            _ => None,
        }
    }

    pub(crate) fn lanes(&self) -> Option<u8> {
        match self {
            Type::Scalar(_) => Some(1),
            Type::Vector(_, n) => Some(*n),
            _ => None,
        }
    }

    pub(crate) fn is_numeric(&self) -> bool {
        matches!(self, Type::Scalar(_) | Type::Vector(_, _))
    }

    pub(crate) fn is_integer(&self) -> bool {
        matches!(self.scalar(), Some(Scalar::Int | Scalar::Uint | Scalar::Bool))
    }

    /// Size and alignment in device memory.  `None` for types that cannot live there.
    pub(crate) fn layout(&self, structs: &[StructDef]) -> Option<(usize, usize)> {
        match self {
            Type::Scalar(Scalar::Bool) => Some((1, 1)),
            Type::Scalar(_) => Some((4, 4)),
            Type::Vector(Scalar::Bool, _) => None,
            Type::Vector(_, 2) => Some((8, 8)),
            Type::Vector(_, _) => Some((16, 16)),
            Type::Struct(i) => structs.get(*i).map(|s| (s.size, s.align)),
            Type::Void | Type::Pointer { .. } => None,
        }
    }

    pub(crate) fn display<'a>(&'a self, structs: &'a [StructDef]) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, structs }
    }
}

pub(crate) struct TypeDisplay<'a> {
    ty: &'a Type,
    structs: &'a [StructDef],
}

impl Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.ty {
            Type::Void => write!(f, "void"),
            Type::Scalar(s) => write!(f, "{}", s.name()),
            Type::Vector(s, n) => write!(f, "{}{}", s.name(), n),
            Type::Struct(i) => match self.structs.get(*i) {
                Some(s) => write!(f, "{}", s.name),
                None => write!(f, "<struct>"),
            },
            Type::Pointer {
                space,
                is_const,
                pointee,
            } => {
                let space = match space {
                    AddressSpace::Device => "device",
                    AddressSpace::Constant => "constant",
                };
                let c = if *is_const { " const" } else { "" };
                write!(f, "{space}{c} {}*", pointee.display(self.structs))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) ty: Type,
    /// Carries `[[position]]`.
    pub(crate) position: bool,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct StructDef {
    pub(crate) name: String,
    pub(crate) fields: Vec<Field>,
    pub(crate) size: usize,
    pub(crate) align: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Kernel,
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    ThreadPositionInGrid,
    ThreadPositionInThreadgroup,
    ThreadgroupPositionInGrid,
    ThreadsPerThreadgroup,
    ThreadsPerGrid,
    VertexId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParamAttr {
    None,
    Buffer(usize),
    Builtin(Builtin),
    StageIn,
}

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub(crate) name: String,
    pub(crate) ty: Type,
    /// Declared with `&`; `ty` is then the pointer and uses auto-dereference.
    pub(crate) by_ref: bool,
    pub(crate) attr: ParamAttr,
    pub(crate) pos: Pos,
}

#[derive(Debug, Clone)]
pub(crate) struct Function {
    pub(crate) name: String,
    pub(crate) stage: Option<Stage>,
    pub(crate) ret: Type,
    pub(crate) params: Vec<Param>,
    pub(crate) body: Vec<Stmt>,
    pub(crate) max_total_threads: Option<usize>,
    /// Local slot count, params first.  Set by the checker.
    pub(crate) frame_size: usize,
    pub(crate) pos: Pos,
}

impl Function {
    /// Buffer indices the function reads, in parameter order.  Set by the checker.
    pub(crate) fn buffer_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.params.iter().filter_map(|p| match p.attr {
            ParamAttr::Buffer(i) => Some(i),
            _ => None,
        })
    }

    pub(crate) fn stage_in(&self) -> Option<&Param> {
        self.params.iter().find(|p| p.attr == ParamAttr::StageIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub(crate) fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    pub(crate) fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    /// Operators defined only on integers.
    pub(crate) fn is_integer_only(self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr | BinOp::Rem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuiltinFn {
    Min,
    Max,
    Clamp,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Exp,
    Log,
    Floor,
    Ceil,
    Fract,
    Saturate,
    Pow,
    Mix,
    Dot,
    Length,
    Normalize,
}

impl BuiltinFn {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => BuiltinFn::Min,
            "max" => BuiltinFn::Max,
            "clamp" => BuiltinFn::Clamp,
            "abs" => BuiltinFn::Abs,
            "sqrt" => BuiltinFn::Sqrt,
            "sin" => BuiltinFn::Sin,
            "cos" => BuiltinFn::Cos,
            "exp" => BuiltinFn::Exp,
            "log" => BuiltinFn::Log,
            "floor" => BuiltinFn::Floor,
            "ceil" => BuiltinFn::Ceil,
            "fract" => BuiltinFn::Fract,
            "saturate" => BuiltinFn::Saturate,
            "pow" => BuiltinFn::Pow,
            "mix" => BuiltinFn::Mix,
            "dot" => BuiltinFn::Dot,
            "length" => BuiltinFn::Length,
            "normalize" => BuiltinFn::Normalize,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Callee {
    Unresolved,
    Construct(Type),
    Builtin(BuiltinFn),
    /// Index into [`Module::functions`].
    Function(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Access {
    Unresolved,
    Field(usize),
    Swizzle { lanes: [u8; 4], len: u8 },
}

#[derive(Debug, Clone)]
pub(crate) enum ExprKind {
    Int { value: u64, unsigned: bool },
    Float(f32),
    Bool(bool),
    Var { name: String, slot: usize, by_ref: bool },
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr>, callee: Callee },
    Cast(Type, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Member { base: Box<Expr>, name: String, access: Access },
}

#[derive(Debug, Clone)]
pub(crate) struct Expr {
    pub(crate) kind: ExprKind,
    pub(crate) ty: Type,
    pub(crate) pos: Pos,
}

impl Expr {
    pub(crate) fn new(kind: ExprKind, pos: Pos) -> Self {
        Expr {
            kind,
            ty: Type::Void,
            pos,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Decl {
        ty: Type,
        is_const: bool,
        name: String,
        slot: usize,
        init: Option<Expr>,
        pos: Pos,
    },
    Assign {
        target: Expr,
        op: Option<BinOp>,
        value: Expr,
        pos: Pos,
    },
    /// `x++` / `x--`.
    Step { target: Expr, delta: i8, pos: Pos },
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Box<Stmt>,
    },
    While { cond: Expr, body: Box<Stmt> },
    Return(Option<Expr>, Pos),
    Break(Pos),
    Continue(Pos),
    Block(Vec<Stmt>),
    Expr(Expr),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Module {
    pub(crate) structs: Vec<StructDef>,
    pub(crate) functions: Vec<Function>,
}

impl Module {
    pub(crate) fn entry_point(&self, name: &str) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| f.name == name && f.stage.is_some())
    }

    pub(crate) fn type_name(&self, ty: &Type) -> String {
        ty.display(&self.structs).to_string()
    }
}
