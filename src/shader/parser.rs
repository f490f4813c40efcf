// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Recursive-descent parser.
//!
//! Types are resolved while parsing: structs must be declared before use, as in C, so a name
//! is known to be a type by the time it appears.

use super::Diagnostic;
use super::ast::*;
use super::lexer::{Lexeme, Token};

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "return", "break", "continue", "struct", "kernel", "vertex",
    "fragment", "true", "false", "const", "device", "constant", "using", "namespace", "void",
];

/// Deepest nesting of expressions and statements accepted, as in clang's bracket depth.
const MAX_NESTING: usize = 256;

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    module: Module,
}

/// A type as written in a declaration.
struct Declared {
    ty: Type,
    is_const: bool,
    by_ref: bool,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            module: Module::default(),
        }
    }

    pub(crate) fn parse_module(mut self) -> Result<Module, Diagnostic> {
        while *self.peek() != Lexeme::Eof {
            if self.eat_ident("using") {
                self.expect_keyword("namespace")?;
                self.expect_name()?;
                self.expect_punct(";")?;
            } else if self.is_ident("struct") {
                self.parse_struct()?;
            } else {
                let function = self.parse_function()?;
                if self.module.functions.iter().any(|f| f.name == function.name) {
                    return Err(Diagnostic::at(
                        function.pos,
                        format!("redefinition of '{}'", function.name),
                    ));
                }
                self.module.functions.push(function);
            }
        }
        Ok(self.module)
    }

    // ---- token helpers ----

    fn peek(&self) -> &Lexeme {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Lexeme {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)].lexeme
    }

    fn here(&self) -> Pos {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        Pos {
            line: tok.line,
            col: tok.col,
        }
    }

    fn bump(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    /// Enters one level of nesting.  A failed parse is abandoned, so callers restore
    /// `depth` on success only.
    fn descend(&mut self, what: &str) -> Result<(), Diagnostic> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(format!("{what} nested too deeply")));
        }
        self.depth += 1;
        Ok(())
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::at(self.here(), message)
    }

    fn describe(&self) -> String {
        match self.peek() {
            Lexeme::Ident(s) => format!("'{s}'"),
            Lexeme::Int { value, .. } => format!("'{value}'"),
            Lexeme::Float(v) => format!("'{v}'"),
            Lexeme::Punct(p) => format!("'{p}'"),
            Lexeme::Eof => "end of file".to_string(),
        }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Lexeme::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), Diagnostic> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{p}', found {}", self.describe())))
        }
    }

    fn is_ident(&self, s: &str) -> bool {
        matches!(self.peek(), Lexeme::Ident(name) if name == s)
    }

    fn eat_ident(&mut self, s: &str) -> bool {
        if self.is_ident(s) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, s: &str) -> Result<(), Diagnostic> {
        if self.eat_ident(s) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{s}', found {}", self.describe())))
        }
    }

    fn expect_name(&mut self) -> Result<String, Diagnostic> {
        match self.peek().clone() {
            Lexeme::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.error_here(format!("expected identifier, found {}", self.describe()))),
        }
    }

    fn expect_int(&mut self) -> Result<u64, Diagnostic> {
        match *self.peek() {
            Lexeme::Int { value, .. } => {
                self.bump();
                Ok(value)
            }
            _ => Err(self.error_here(format!(
                "expected integer constant, found {}",
                self.describe()
            ))),
        }
    }

    // ---- types ----

    fn base_type(&self, name: &str) -> Option<Type> {
        let scalar = |s: &str| match s {
            "float" => Some(Scalar::Float),
            "int" => Some(Scalar::Int),
            "uint" => Some(Scalar::Uint),
            "bool" => Some(Scalar::Bool),
            _ => None,
        };
        if name == "void" {
            return Some(Type::Void);
        }
        if let Some(s) = scalar(name) {
            return Some(Type::Scalar(s));
        }
        for n in 2..=4u8 {
            if let Some(prefix) = name.strip_suffix(char::from(b'0' + n)) {
                if let Some(s) = scalar(prefix).filter(|s| *s != Scalar::Bool) {
                    return Some(Type::Vector(s, n));
                }
            }
        }
        self.module
            .structs
            .iter()
            .position(|s| s.name == name)
            .map(Type::Struct)
    }

    /// Whether the upcoming tokens start a declaration.
    fn at_type(&self) -> bool {
        match self.peek() {
            Lexeme::Ident(name) => {
                matches!(
                    name.as_str(),
                    "const" | "device" | "constant" | "thread" | "threadgroup"
                ) || self.base_type(name).is_some()
            }
            _ => false,
        }
    }

    fn parse_declared_type(&mut self) -> Result<Declared, Diagnostic> {
        let mut is_const = false;
        let mut space = None;
        loop {
            if self.eat_ident("const") {
                is_const = true;
            } else if self.eat_ident("device") {
                space = Some(AddressSpace::Device);
            } else if self.eat_ident("constant") {
                space = Some(AddressSpace::Constant);
            } else if self.eat_ident("thread") {
                // the default for locals
            } else if self.is_ident("threadgroup") {
                return Err(self.error_here("threadgroup memory is not supported"));
            } else {
                break;
            }
        }
        let here = self.here();
        let name = match self.peek() {
            Lexeme::Ident(name) => name.clone(),
            _ => return Err(self.error_here(format!("expected type, found {}", self.describe()))),
        };
        let base = self
            .base_type(&name)
            .ok_or_else(|| Diagnostic::at(here, format!("unknown type name '{name}'")))?;
        self.bump();
        while self.eat_ident("const") {
            is_const = true;
        }
        let indirection = if self.eat_punct("*") {
            Some(false)
        } else if self.eat_punct("&") {
            Some(true)
        } else {
            None
        };
        match indirection {
            Some(by_ref) => {
                let space = space.ok_or_else(|| {
                    Diagnostic::at(
                        here,
                        "pointer and reference types need an address space (device or constant)",
                    )
                })?;
                if base == Type::Void {
                    return Err(Diagnostic::at(here, "void pointers are not supported"));
                }
                // `device float* const p`: the pointer itself is const, the pointee is not
                self.eat_ident("const");
                Ok(Declared {
                    ty: Type::Pointer {
                        space,
                        is_const: is_const || space == AddressSpace::Constant,
                        pointee: Box::new(base),
                    },
                    is_const: false,
                    by_ref,
                })
            }
            None => {
                if space.is_some() {
                    return Err(Diagnostic::at(
                        here,
                        "address space qualifiers apply only to pointers and references",
                    ));
                }
                Ok(Declared {
                    ty: base,
                    is_const,
                    by_ref: false,
                })
            }
        }
    }

    // ---- attributes ----

    /// `[[name]]` or `[[name(arg)]]`, possibly several in one list.
    fn parse_attributes(&mut self) -> Result<Vec<(String, Option<Lexeme>, Pos)>, Diagnostic> {
        let mut out = Vec::new();
        while self.is_punct("[") && matches!(self.peek_at(1), Lexeme::Punct("[")) {
            self.bump();
            self.bump();
            loop {
                let pos = self.here();
                let name = self.expect_name()?;
                let arg = if self.eat_punct("(") {
                    let arg = self.peek().clone();
                    self.bump();
                    self.expect_punct(")")?;
                    Some(arg)
                } else {
                    None
                };
                out.push((name, arg, pos));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
            self.expect_punct("]")?;
        }
        Ok(out)
    }

    // ---- items ----

    fn parse_struct(&mut self) -> Result<(), Diagnostic> {
        let pos = self.here();
        self.expect_keyword("struct")?;
        let name = self.expect_name()?;
        if self.base_type(&name).is_some() {
            return Err(Diagnostic::at(pos, format!("redefinition of '{name}'")));
        }
        self.expect_punct("{")?;
        let mut fields: Vec<Field> = Vec::new();
        let (mut cursor, mut align) = (0usize, 1usize);
        while !self.eat_punct("}") {
            let field_pos = self.here();
            let declared = self.parse_declared_type()?;
            let field_name = self.expect_name()?;
            let mut position = false;
            for (attr, _, attr_pos) in self.parse_attributes()? {
                match attr.as_str() {
                    "position" => position = true,
                    "user" => {}
                    other => {
                        return Err(Diagnostic::at(
                            attr_pos,
                            format!("unknown field attribute '{other}'"),
                        ));
                    }
                }
            }
            self.expect_punct(";")?;
            if declared.by_ref || matches!(declared.ty, Type::Pointer { .. }) {
                return Err(Diagnostic::at(
                    field_pos,
                    "pointer fields are not supported",
                ));
            }
            let (size, field_align) = declared.ty.layout(&self.module.structs).ok_or_else(|| {
                Diagnostic::at(field_pos, format!("field '{field_name}' has no storable type"))
            })?;
            if fields.iter().any(|f| f.name == field_name) {
                return Err(Diagnostic::at(
                    field_pos,
                    format!("duplicate member '{field_name}'"),
                ));
            }
            let offset = cursor.next_multiple_of(field_align);
            cursor = offset + size;
            align = align.max(field_align);
            fields.push(Field {
                name: field_name,
                ty: declared.ty,
                position,
                offset,
            });
        }
        self.expect_punct(";")?;
        if fields.is_empty() {
            return Err(Diagnostic::at(pos, format!("struct '{name}' has no members")));
        }
        self.module.structs.push(StructDef {
            name,
            fields,
            size: cursor.next_multiple_of(align),
            align,
        });
        Ok(())
    }

    fn parse_function(&mut self) -> Result<Function, Diagnostic> {
        let mut max_total_threads = None;
        for (attr, arg, pos) in self.parse_attributes()? {
            match (attr.as_str(), arg) {
                ("max_total_threads_per_threadgroup", Some(Lexeme::Int { value, .. }))
                    if value > 0 =>
                {
                    max_total_threads = Some(value as usize)
                }
                _ => {
                    return Err(Diagnostic::at(
                        pos,
                        format!("invalid function attribute '{attr}'"),
                    ));
                }
            }
        }
        let pos = self.here();
        let stage = if self.eat_ident("kernel") {
            Some(Stage::Kernel)
        } else if self.eat_ident("vertex") {
            Some(Stage::Vertex)
        } else if self.eat_ident("fragment") {
            Some(Stage::Fragment)
        } else {
            None
        };
        let ret = self.parse_declared_type()?;
        if ret.by_ref || matches!(ret.ty, Type::Pointer { .. }) {
            return Err(Diagnostic::at(pos, "functions cannot return pointers"));
        }
        let name = self.expect_name()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !(self.is_ident("void") && matches!(self.peek_at(1), Lexeme::Punct(")"))) {
            while !self.is_punct(")") {
                params.push(self.parse_param()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        } else {
            self.bump();
        }
        self.expect_punct(")")?;
        // MSL also allows the attribute after the parameter list
        for (attr, arg, attr_pos) in self.parse_attributes()? {
            match (attr.as_str(), arg) {
                ("max_total_threads_per_threadgroup", Some(Lexeme::Int { value, .. }))
                    if value > 0 =>
                {
                    max_total_threads = Some(value as usize)
                }
                _ => {
                    return Err(Diagnostic::at(
                        attr_pos,
                        format!("invalid function attribute '{attr}'"),
                    ));
                }
            }
        }
        let body = self.parse_block()?;
        Ok(Function {
            name,
            stage,
            ret: ret.ty,
            params,
            body,
            max_total_threads,
            frame_size: 0,
            pos,
        })
    }

    fn parse_param(&mut self) -> Result<Param, Diagnostic> {
        let pos = self.here();
        let declared = self.parse_declared_type()?;
        let name = self.expect_name()?;
        let mut attr = ParamAttr::None;
        for (attr_name, arg, attr_pos) in self.parse_attributes()? {
            let parsed = match (attr_name.as_str(), arg) {
                ("buffer", Some(Lexeme::Int { value, .. })) => ParamAttr::Buffer(value as usize),
                ("thread_position_in_grid", None) => {
                    ParamAttr::Builtin(Builtin::ThreadPositionInGrid)
                }
                ("thread_position_in_threadgroup", None) => {
                    ParamAttr::Builtin(Builtin::ThreadPositionInThreadgroup)
                }
                ("threadgroup_position_in_grid", None) => {
                    ParamAttr::Builtin(Builtin::ThreadgroupPositionInGrid)
                }
                ("threads_per_threadgroup", None) => {
                    ParamAttr::Builtin(Builtin::ThreadsPerThreadgroup)
                }
                ("threads_per_grid", None) => ParamAttr::Builtin(Builtin::ThreadsPerGrid),
                ("vertex_id", None) => ParamAttr::Builtin(Builtin::VertexId),
                ("stage_in", None) => ParamAttr::StageIn,
                _ => {
                    return Err(Diagnostic::at(
                        attr_pos,
                        format!("unknown parameter attribute '{attr_name}'"),
                    ));
                }
            };
            attr = parsed;
        }
        Ok(Param {
            name,
            ty: declared.ty,
            by_ref: declared.by_ref,
            attr,
            pos,
        })
    }

    // ---- statements ----

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect_punct("{")?;
        self.descend("block")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if *self.peek() == Lexeme::Eof {
                return Err(self.error_here("expected '}' before end of file"));
            }
            if self.at_type() {
                stmts.extend(self.parse_declaration()?);
                self.expect_punct(";")?;
            } else {
                stmts.push(self.parse_statement()?);
            }
        }
        self.depth -= 1;
        Ok(stmts)
    }

    /// One or more comma-separated declarators, without the trailing `;`.
    fn parse_declaration(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let declared = self.parse_declared_type()?;
        if declared.by_ref {
            return Err(self.error_here("local references are not supported"));
        }
        if declared.ty == Type::Void {
            return Err(self.error_here("variable has incomplete type 'void'"));
        }
        let mut out = Vec::new();
        loop {
            let pos = self.here();
            let name = self.expect_name()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            out.push(Stmt::Decl {
                ty: declared.ty.clone(),
                is_const: declared.is_const,
                name,
                slot: 0,
                init,
                pos,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(out)
    }

    /// A statement used as the body of `if`, `for` or `while`.
    fn parse_sub_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.descend("statement")?;
        let stmt = if self.at_type() {
            let decls = self.parse_declaration()?;
            self.expect_punct(";")?;
            Stmt::Block(decls)
        } else {
            self.parse_statement()?
        };
        self.depth -= 1;
        Ok(stmt)
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.here();
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Block(Vec::new()));
        }
        if self.eat_ident("if") {
            self.expect_punct("(")?;
            let cond = self.parse_expr()?;
            self.expect_punct(")")?;
            let then = Box::new(self.parse_sub_statement()?);
            let otherwise = if self.eat_ident("else") {
                Some(Box::new(self.parse_sub_statement()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                cond,
                then,
                otherwise,
            });
        }
        if self.eat_ident("while") {
            self.expect_punct("(")?;
            let cond = self.parse_expr()?;
            self.expect_punct(")")?;
            let body = Box::new(self.parse_sub_statement()?);
            return Ok(Stmt::While { cond, body });
        }
        if self.eat_ident("for") {
            self.expect_punct("(")?;
            let init = if self.eat_punct(";") {
                None
            } else {
                let init = if self.at_type() {
                    let mut decls = self.parse_declaration()?;
                    if decls.len() != 1 {
                        return Err(Diagnostic::at(
                            pos,
                            "a for loop may declare only one variable",
                        ));
                    }
                    decls.remove(0)
                } else {
                    self.parse_simple_statement()?
                };
                self.expect_punct(";")?;
                Some(Box::new(init))
            };
            let cond = if self.is_punct(";") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_punct(";")?;
            let step = if self.is_punct(")") {
                None
            } else {
                Some(Box::new(self.parse_simple_statement()?))
            };
            self.expect_punct(")")?;
            let body = Box::new(self.parse_sub_statement()?);
            return Ok(Stmt::For {
                init,
                cond,
                step,
                body,
            });
        }
        if self.eat_ident("return") {
            let value = if self.is_punct(";") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_punct(";")?;
            return Ok(Stmt::Return(value, pos));
        }
        if self.eat_ident("break") {
            self.expect_punct(";")?;
            return Ok(Stmt::Break(pos));
        }
        if self.eat_ident("continue") {
            self.expect_punct(";")?;
            return Ok(Stmt::Continue(pos));
        }
        let stmt = self.parse_simple_statement()?;
        self.expect_punct(";")?;
        Ok(stmt)
    }

    /// Assignment, increment or expression statement, without the `;`.
    fn parse_simple_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.here();
        for (punct, delta) in [("++", 1i8), ("--", -1i8)] {
            if self.eat_punct(punct) {
                let target = self.parse_unary()?;
                return Ok(Stmt::Step { target, delta, pos });
            }
        }
        let target = self.parse_expr()?;
        let op = match self.peek() {
            Lexeme::Punct("=") => Some(None),
            Lexeme::Punct("+=") => Some(Some(BinOp::Add)),
            Lexeme::Punct("-=") => Some(Some(BinOp::Sub)),
            Lexeme::Punct("*=") => Some(Some(BinOp::Mul)),
            Lexeme::Punct("/=") => Some(Some(BinOp::Div)),
            Lexeme::Punct("%=") => Some(Some(BinOp::Rem)),
            Lexeme::Punct("&=") => Some(Some(BinOp::BitAnd)),
            Lexeme::Punct("|=") => Some(Some(BinOp::BitOr)),
            Lexeme::Punct("^=") => Some(Some(BinOp::BitXor)),
            Lexeme::Punct("<<=") => Some(Some(BinOp::Shl)),
            Lexeme::Punct(">>=") => Some(Some(BinOp::Shr)),
            Lexeme::Punct("++") => {
                self.bump();
                return Ok(Stmt::Step {
                    target,
                    delta: 1,
                    pos,
                });
            }
            Lexeme::Punct("--") => {
                self.bump();
                return Ok(Stmt::Step {
                    target,
                    delta: -1,
                    pos,
                });
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.bump();
                let value = self.parse_expr()?;
                Ok(Stmt::Assign {
                    target,
                    op,
                    value,
                    pos,
                })
            }
            None => Ok(Stmt::Expr(target)),
        }
    }

    // ---- expressions ----

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.descend("expression")?;
        let cond = self.parse_binary(0)?;
        let expr = if self.is_punct("?") {
            let pos = self.here();
            self.bump();
            let a = self.parse_expr()?;
            self.expect_punct(":")?;
            let b = self.parse_expr()?;
            Expr::new(
                ExprKind::Ternary(Box::new(cond), Box::new(a), Box::new(b)),
                pos,
            )
        } else {
            cond
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn binary_op(&self) -> Option<(BinOp, u8)> {
        let Lexeme::Punct(p) = self.peek() else {
            return None;
        };
        Some(match *p {
            "||" => (BinOp::Or, 1),
            "&&" => (BinOp::And, 2),
            "|" => (BinOp::BitOr, 3),
            "^" => (BinOp::BitXor, 4),
            "&" => (BinOp::BitAnd, 5),
            "==" => (BinOp::Eq, 6),
            "!=" => (BinOp::Ne, 6),
            "<" => (BinOp::Lt, 7),
            "<=" => (BinOp::Le, 7),
            ">" => (BinOp::Gt, 7),
            ">=" => (BinOp::Ge, 7),
            "<<" => (BinOp::Shl, 8),
            ">>" => (BinOp::Shr, 8),
            "+" => (BinOp::Add, 9),
            "-" => (BinOp::Sub, 9),
            "*" => (BinOp::Mul, 10),
            "/" => (BinOp::Div, 10),
            "%" => (BinOp::Rem, 10),
            _ => return None,
        })
    }

    /// Precedence climbing; all binary operators are left associative.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_unary()?;
        let depth = self.depth;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            let pos = self.here();
            self.bump();
            // every link deepens the left-leaning tree
            self.descend("expression")?;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), pos);
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let pos = self.here();
        let op = match self.peek() {
            Lexeme::Punct("-") => Some(UnOp::Neg),
            Lexeme::Punct("!") => Some(UnOp::Not),
            Lexeme::Punct("~") => Some(UnOp::BitNot),
            Lexeme::Punct("+") => {
                self.bump();
                return self.parse_operand();
            }
            Lexeme::Punct("++") | Lexeme::Punct("--") => {
                return Err(self.error_here("increment is only supported as a statement"));
            }
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_operand()?;
            return Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), pos));
        }
        // C-style cast: `(float)x`
        if self.is_punct("(") && matches!(self.peek_at(2), Lexeme::Punct(")")) {
            if let Lexeme::Ident(name) = self.peek_at(1) {
                if let Some(ty) = self.base_type(name).filter(|t| t.is_numeric()) {
                    self.bump();
                    self.bump();
                    self.bump();
                    let operand = self.parse_operand()?;
                    return Ok(Expr::new(ExprKind::Cast(ty, Box::new(operand)), pos));
                }
            }
        }
        self.parse_postfix()
    }

    /// The operand of a prefix operator or cast.
    fn parse_operand(&mut self) -> Result<Expr, Diagnostic> {
        self.descend("expression")?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(operand)
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        let depth = self.depth;
        loop {
            let pos = self.here();
            if self.is_punct("[") || self.is_punct(".") || self.is_punct("->") {
                self.descend("expression")?;
            }
            if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), pos);
            } else if self.eat_punct(".") {
                let name = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr),
                        name,
                        access: Access::Unresolved,
                    },
                    pos,
                );
            } else if self.eat_punct("->") {
                let name = self.expect_name()?;
                let zero = Expr::new(
                    ExprKind::Int {
                        value: 0,
                        unsigned: false,
                    },
                    pos,
                );
                let deref = Expr::new(ExprKind::Index(Box::new(expr), Box::new(zero)), pos);
                expr = Expr::new(
                    ExprKind::Member {
                        base: Box::new(deref),
                        name,
                        access: Access::Unresolved,
                    },
                    pos,
                );
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let pos = self.here();
        match self.peek().clone() {
            Lexeme::Int { value, unsigned } => {
                self.bump();
                Ok(Expr::new(ExprKind::Int { value, unsigned }, pos))
            }
            Lexeme::Float(v) => {
                self.bump();
                Ok(Expr::new(ExprKind::Float(v), pos))
            }
            Lexeme::Punct("(") => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Lexeme::Ident(name) if name == "true" || name == "false" => {
                self.bump();
                Ok(Expr::new(ExprKind::Bool(name == "true"), pos))
            }
            Lexeme::Ident(name) => {
                let is_type = self.base_type(&name).is_some();
                if !is_type && RESERVED.contains(&name.as_str()) {
                    return Err(self.error_here(format!("expected expression, found '{name}'")));
                }
                self.bump();
                if self.eat_punct("(") {
                    let mut args = Vec::new();
                    while !self.is_punct(")") {
                        args.push(self.parse_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct(")")?;
                    let callee = match self.base_type(&name) {
                        Some(ty) if ty.is_numeric() => Callee::Construct(ty),
                        _ => Callee::Unresolved,
                    };
                    return Ok(Expr::new(ExprKind::Call { name, args, callee }, pos));
                }
                if is_type {
                    return Err(Diagnostic::at(
                        pos,
                        format!("unexpected type name '{name}'"),
                    ));
                }
                Ok(Expr::new(
                    ExprKind::Var {
                        name,
                        slot: 0,
                        by_ref: false,
                    },
                    pos,
                ))
            }
            _ => Err(self.error_here(format!("expected expression, found {}", self.describe()))),
        }
    }
}
