// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Semantic analysis.
//!
//! Resolves every name, assigns local slots, types every expression and validates entry-point
//! signatures.  Implicit `[[buffer(n)]]` indices are assigned here, so after checking every
//! pointer parameter of an entry point carries an explicit slot.

use super::Diagnostic;
use super::ast::*;
use std::collections::HashMap;

/// Buffer argument table size of the device.
pub(crate) const MAX_BUFFER_INDEX: usize = 31;

struct Signature {
    name: String,
    stage: Option<Stage>,
    ret: Type,
    params: Vec<Type>,
}

#[derive(Clone)]
struct Local {
    slot: usize,
    ty: Type,
    by_ref: bool,
    is_const: bool,
}

pub(crate) fn check_module(module: &mut Module) -> Result<(), Diagnostic> {
    let mut signatures: Vec<Signature> = Vec::new();
    for index in 0..module.functions.len() {
        let structs = &module.structs;
        let function = &mut module.functions[index];
        check_signature(function, structs)?;
        // registered before the body so the body can see it; the interpreter bounds recursion
        signatures.push(Signature {
            name: function.name.clone(),
            stage: function.stage,
            ret: function.ret.clone(),
            params: function.params.iter().map(|p| p.ty.clone()).collect(),
        });
        let mut checker = FnChecker {
            structs,
            signatures: &signatures,
            scopes: vec![HashMap::new()],
            next_slot: 0,
            ret: function.ret.clone(),
            loop_depth: 0,
        };
        for param in &function.params {
            let is_const = match &param.ty {
                Type::Pointer { is_const, .. } => param.by_ref && *is_const,
                _ => false,
            };
            checker.declare(&param.name, param.ty.clone(), param.by_ref, is_const, param.pos)?;
        }
        checker.check_stmts(&mut function.body)?;
        function.frame_size = checker.next_slot;
    }
    Ok(())
}

fn is_thread_index(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Scalar(Scalar::Uint | Scalar::Int) | Type::Vector(Scalar::Uint | Scalar::Int, 2 | 3)
    )
}

fn check_signature(function: &mut Function, structs: &[StructDef]) -> Result<(), Diagnostic> {
    let name = function.name.clone();
    for (i, param) in function.params.iter().enumerate() {
        if param.ty == Type::Void {
            return Err(Diagnostic::at(param.pos, "parameter has incomplete type 'void'"));
        }
        if function.params[..i].iter().any(|p| p.name == param.name) {
            return Err(Diagnostic::at(
                param.pos,
                format!("redefinition of parameter '{}'", param.name),
            ));
        }
    }
    if function.max_total_threads.is_some() && function.stage != Some(Stage::Kernel) {
        return Err(Diagnostic::at(
            function.pos,
            "max_total_threads_per_threadgroup applies only to kernel functions",
        ));
    }
    let Some(stage) = function.stage else {
        for param in &function.params {
            if param.by_ref || param.attr != ParamAttr::None {
                return Err(Diagnostic::at(
                    param.pos,
                    format!(
                        "parameter '{}' of helper function '{name}' cannot be a reference or carry attributes",
                        param.name
                    ),
                ));
            }
        }
        return Ok(());
    };

    match stage {
        Stage::Kernel => {
            if function.ret != Type::Void {
                return Err(Diagnostic::at(function.pos, "kernel function must return void"));
            }
        }
        Stage::Vertex => {
            let ok = match &function.ret {
                Type::Vector(Scalar::Float, 4) => true,
                Type::Struct(i) => {
                    let s = &structs[*i];
                    let positions: Vec<_> = s.fields.iter().filter(|f| f.position).collect();
                    positions.len() == 1 && positions[0].ty == Type::Vector(Scalar::Float, 4)
                }
                _ => false,
            };
            if !ok {
                return Err(Diagnostic::at(
                    function.pos,
                    "vertex function must return float4 or a struct with one float4 [[position]] member",
                ));
            }
        }
        Stage::Fragment => {
            if function.ret != Type::Vector(Scalar::Float, 4) {
                return Err(Diagnostic::at(function.pos, "fragment function must return float4"));
            }
        }
    }

    let mut used = Vec::new();
    let mut stage_in_seen = false;
    for param in &function.params {
        let is_indirect = param.by_ref || matches!(param.ty, Type::Pointer { .. });
        match &param.attr {
            ParamAttr::Buffer(index) => {
                if !is_indirect {
                    return Err(Diagnostic::at(
                        param.pos,
                        format!(
                            "[[buffer({index})]] parameter '{}' must be a pointer or reference",
                            param.name
                        ),
                    ));
                }
                if *index >= MAX_BUFFER_INDEX {
                    return Err(Diagnostic::at(
                        param.pos,
                        format!("buffer index {index} is out of range"),
                    ));
                }
                if used.contains(index) {
                    return Err(Diagnostic::at(
                        param.pos,
                        format!("buffer index {index} is already in use"),
                    ));
                }
                used.push(*index);
            }
            ParamAttr::Builtin(builtin) => {
                let valid_stage = match builtin {
                    Builtin::VertexId => stage == Stage::Vertex,
                    _ => stage == Stage::Kernel,
                };
                if !valid_stage {
                    return Err(Diagnostic::at(
                        param.pos,
                        format!("attribute of '{}' is not valid in this function", param.name),
                    ));
                }
                let type_ok = match builtin {
                    Builtin::VertexId => {
                        matches!(param.ty, Type::Scalar(Scalar::Uint | Scalar::Int))
                    }
                    _ => is_thread_index(&param.ty),
                };
                if !type_ok || param.by_ref {
                    return Err(Diagnostic::at(
                        param.pos,
                        format!("invalid type for builtin parameter '{}'", param.name),
                    ));
                }
            }
            ParamAttr::StageIn => {
                if stage != Stage::Fragment {
                    return Err(Diagnostic::at(
                        param.pos,
                        "[[stage_in]] is only supported in fragment functions",
                    ));
                }
                if stage_in_seen {
                    return Err(Diagnostic::at(
                        param.pos,
                        "only one [[stage_in]] parameter is allowed",
                    ));
                }
                stage_in_seen = true;
                if !matches!(param.ty, Type::Struct(_) | Type::Vector(Scalar::Float, 4))
                    || param.by_ref
                {
                    return Err(Diagnostic::at(
                        param.pos,
                        "[[stage_in]] parameter must be a struct or float4 value",
                    ));
                }
            }
            ParamAttr::None => {
                if !is_indirect {
                    return Err(Diagnostic::at(
                        param.pos,
                        format!(
                            "parameter '{}' needs a builtin attribute or must be a buffer pointer",
                            param.name
                        ),
                    ));
                }
            }
        }
    }
    // implicit indices fill the lowest free slots in declaration order
    for param in &mut function.params {
        if param.attr == ParamAttr::None {
            let index = (0..MAX_BUFFER_INDEX)
                .find(|i| !used.contains(i))
                .ok_or_else(|| Diagnostic::at(param.pos, "too many buffer parameters"))?;
            used.push(index);
            param.attr = ParamAttr::Buffer(index);
        }
    }
    Ok(())
}

pub(crate) fn arith_result(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        (Type::Scalar(x), Type::Scalar(y)) => Some(Type::Scalar(Scalar::common(*x, *y))),
        (Type::Vector(x, n), Type::Scalar(y)) | (Type::Scalar(y), Type::Vector(x, n)) => {
            Some(Type::Vector(Scalar::common(*x, *y), *n))
        }
        (Type::Vector(x, n), Type::Vector(y, m)) if n == m => {
            Some(Type::Vector(Scalar::common(*x, *y), *n))
        }
        _ => None,
    }
}

fn to_float(ty: &Type) -> Type {
    match ty {
        Type::Vector(_, n) => Type::Vector(Scalar::Float, *n),
        _ => Type::FLOAT,
    }
}

fn assignable(from: &Type, to: &Type) -> bool {
    match (from, to) {
        (a, b) if a == b => true,
        (Type::Scalar(_), Type::Scalar(_)) | (Type::Scalar(_), Type::Vector(_, _)) => true,
        (Type::Vector(_, n), Type::Vector(_, m)) => n == m,
        (
            Type::Pointer {
                space: s1,
                is_const: c1,
                pointee: p1,
            },
            Type::Pointer {
                space: s2,
                is_const: c2,
                pointee: p2,
            },
        ) => s1 == s2 && p1 == p2 && (!*c1 || *c2),
        _ => false,
    }
}

fn swizzle(name: &str, lanes_available: u8) -> Option<([u8; 4], u8)> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    let sets = ["xyzw", "rgba"];
    for set in sets {
        let mut lanes = [0u8; 4];
        let mut ok = true;
        for (i, ch) in name.chars().enumerate() {
            match set.find(ch) {
                Some(lane) if (lane as u8) < lanes_available => lanes[i] = lane as u8,
                _ => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            return Some((lanes, name.len() as u8));
        }
    }
    None
}

struct FnChecker<'m> {
    structs: &'m [StructDef],
    signatures: &'m [Signature],
    scopes: Vec<HashMap<String, Local>>,
    next_slot: usize,
    ret: Type,
    loop_depth: usize,
}

impl FnChecker<'_> {
    fn name_of(&self, ty: &Type) -> String {
        ty.display(self.structs).to_string()
    }

    fn declare(
        &mut self,
        name: &str,
        ty: Type,
        by_ref: bool,
        is_const: bool,
        pos: Pos,
    ) -> Result<usize, Diagnostic> {
        let slot = self.next_slot;
        let Some(scope) = self.scopes.last_mut() else {
            return Err(Diagnostic::at(pos, "declaration outside any scope"));
        };
        if scope.contains_key(name) {
            return Err(Diagnostic::at(pos, format!("redefinition of '{name}'")));
        }
        self.next_slot += 1;
        scope.insert(
            name.to_string(),
            Local {
                slot,
                ty,
                by_ref,
                is_const,
            },
        );
        Ok(slot)
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn check_stmts(&mut self, stmts: &mut [Stmt]) -> Result<(), Diagnostic> {
        for stmt in stmts {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn scoped<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, Diagnostic>,
    ) -> Result<R, Diagnostic> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn check_condition(&mut self, cond: &mut Expr) -> Result<(), Diagnostic> {
        self.check_expr(cond)?;
        if !matches!(cond.ty, Type::Scalar(_)) {
            return Err(Diagnostic::at(
                cond.pos,
                format!("condition of type '{}' is not a scalar", self.name_of(&cond.ty)),
            ));
        }
        Ok(())
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) -> Result<(), Diagnostic> {
        match stmt {
            Stmt::Decl {
                ty,
                is_const,
                name,
                slot,
                init,
                pos,
            } => {
                if let Some(init) = init {
                    self.check_expr(init)?;
                    if !assignable(&init.ty, ty) {
                        return Err(Diagnostic::at(
                            init.pos,
                            format!(
                                "cannot initialize a variable of type '{}' with a value of type '{}'",
                                self.name_of(ty),
                                self.name_of(&init.ty)
                            ),
                        ));
                    }
                } else if *is_const {
                    return Err(Diagnostic::at(
                        *pos,
                        format!("default initialization of const variable '{name}'"),
                    ));
                }
                *slot = self.declare(name, ty.clone(), false, *is_const, *pos)?;
                Ok(())
            }
            Stmt::Assign {
                target,
                op,
                value,
                pos,
            } => {
                self.check_expr(target)?;
                self.check_expr(value)?;
                self.check_lvalue(target)?;
                let result = match op {
                    None => value.ty.clone(),
                    Some(op) => self.binary_type(*op, target, value, *pos)?,
                };
                if !assignable(&result, &target.ty) {
                    return Err(Diagnostic::at(
                        *pos,
                        format!(
                            "assigning to '{}' from incompatible type '{}'",
                            self.name_of(&target.ty),
                            self.name_of(&result)
                        ),
                    ));
                }
                Ok(())
            }
            Stmt::Step { target, pos, .. } => {
                self.check_expr(target)?;
                self.check_lvalue(target)?;
                if !matches!(target.ty, Type::Scalar(Scalar::Int | Scalar::Uint | Scalar::Float)) {
                    return Err(Diagnostic::at(
                        *pos,
                        format!("cannot increment value of type '{}'", self.name_of(&target.ty)),
                    ));
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.check_condition(cond)?;
                self.scoped(|c| c.check_stmt(then))?;
                if let Some(otherwise) = otherwise {
                    self.scoped(|c| c.check_stmt(otherwise))?;
                }
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.scoped(|c| {
                if let Some(init) = init {
                    c.check_stmt(init)?;
                }
                if let Some(cond) = cond {
                    c.check_condition(cond)?;
                }
                if let Some(step) = step {
                    c.check_stmt(step)?;
                }
                c.loop_depth += 1;
                let result = c.scoped(|c| c.check_stmt(body));
                c.loop_depth -= 1;
                result
            }),
            Stmt::While { cond, body } => {
                self.check_condition(cond)?;
                self.loop_depth += 1;
                let result = self.scoped(|c| c.check_stmt(body));
                self.loop_depth -= 1;
                result
            }
            Stmt::Return(value, pos) => match (value, self.ret.clone()) {
                (None, Type::Void) => Ok(()),
                (Some(v), Type::Void) => Err(Diagnostic::at(
                    v.pos,
                    "void function should not return a value",
                )),
                (None, _) => Err(Diagnostic::at(*pos, "non-void function should return a value")),
                (Some(v), ret) => {
                    self.check_expr(v)?;
                    if !assignable(&v.ty, &ret) {
                        return Err(Diagnostic::at(
                            v.pos,
                            format!(
                                "cannot return '{}' from a function returning '{}'",
                                self.name_of(&v.ty),
                                self.name_of(&ret)
                            ),
                        ));
                    }
                    Ok(())
                }
            },
            Stmt::Break(pos) | Stmt::Continue(pos) => {
                if self.loop_depth == 0 {
                    return Err(Diagnostic::at(*pos, "statement not in loop"));
                }
                Ok(())
            }
            Stmt::Block(stmts) => self.scoped(|c| c.check_stmts(stmts)),
            Stmt::Expr(expr) => self.check_expr(expr),
        }
    }

    fn check_lvalue(&self, expr: &Expr) -> Result<(), Diagnostic> {
        match &expr.kind {
            ExprKind::Var { name, .. } => {
                let local = self
                    .lookup(name)
                    .ok_or_else(|| {
                        Diagnostic::at(
                            expr.pos,
                            format!("use of undeclared identifier '{name}'"),
                        )
                    })?;
                if local.is_const {
                    return Err(Diagnostic::at(
                        expr.pos,
                        format!("cannot assign to '{name}' because it is read-only"),
                    ));
                }
                Ok(())
            }
            ExprKind::Index(base, _) => match &base.ty {
                Type::Pointer { is_const: true, .. } => Err(Diagnostic::at(
                    expr.pos,
                    "cannot assign through a pointer to const",
                )),
                Type::Pointer { .. } => Ok(()),
                _ => self.check_lvalue(base),
            },
            ExprKind::Member { base, access, .. } => {
                if let Access::Swizzle { len, .. } = access {
                    if *len > 1 {
                        return Err(Diagnostic::at(
                            expr.pos,
                            "assignment to a multi-component swizzle is not supported",
                        ));
                    }
                }
                self.check_lvalue(base)
            }
            _ => Err(Diagnostic::at(expr.pos, "expression is not assignable")),
        }
    }

    fn binary_type(&self, op: BinOp, l: &Expr, r: &Expr, pos: Pos) -> Result<Type, Diagnostic> {
        let invalid = || {
            Diagnostic::at(
                pos,
                format!(
                    "invalid operands to binary expression ('{}' and '{}')",
                    self.name_of(&l.ty),
                    self.name_of(&r.ty)
                ),
            )
        };
        if !l.ty.is_numeric() || !r.ty.is_numeric() {
            return Err(invalid());
        }
        if op.is_logical() {
            return match (&l.ty, &r.ty) {
                (Type::Scalar(_), Type::Scalar(_)) => Ok(Type::BOOL),
                _ => Err(invalid()),
            };
        }
        if op.is_comparison() {
            return match (&l.ty, &r.ty) {
                (Type::Scalar(_), Type::Scalar(_)) => Ok(Type::BOOL),
                _ => Err(Diagnostic::at(pos, "vector comparisons are not supported")),
            };
        }
        if op.is_integer_only() && !(l.ty.is_integer() && r.ty.is_integer()) {
            return Err(invalid());
        }
        arith_result(&l.ty, &r.ty).ok_or_else(invalid)
    }

    fn check_expr(&mut self, expr: &mut Expr) -> Result<(), Diagnostic> {
        let pos = expr.pos;
        let ty = match &mut expr.kind {
            ExprKind::Int { value, unsigned } => {
                if *unsigned || *value > i32::MAX as u64 {
                    Type::UINT
                } else {
                    Type::INT
                }
            }
            ExprKind::Float(_) => Type::FLOAT,
            ExprKind::Bool(_) => Type::BOOL,
            ExprKind::Var { name, slot, by_ref } => {
                let local = self
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| {
                        Diagnostic::at(pos, format!("use of undeclared identifier '{name}'"))
                    })?;
                *slot = local.slot;
                *by_ref = local.by_ref;
                match (local.by_ref, local.ty) {
                    (true, Type::Pointer { pointee, .. }) => *pointee,
                    (_, ty) => ty,
                }
            }
            ExprKind::Unary(op, operand) => {
                self.check_expr(operand)?;
                match (op, &operand.ty) {
                    (UnOp::Not, Type::Scalar(_)) => Type::BOOL,
                    (UnOp::Neg, Type::Scalar(Scalar::Bool)) => Type::INT,
                    (UnOp::Neg, t) if t.is_numeric() => t.clone(),
                    (UnOp::BitNot, t) if t.is_integer() => match t {
                        Type::Scalar(Scalar::Bool) => Type::INT,
                        _ => t.clone(),
                    },
                    (_, t) => {
                        return Err(Diagnostic::at(
                            pos,
                            format!(
                                "invalid argument type '{}' to unary expression",
                                self.name_of(t)
                            ),
                        ));
                    }
                }
            }
            ExprKind::Binary(op, l, r) => {
                self.check_expr(l)?;
                self.check_expr(r)?;
                self.binary_type(*op, l, r, pos)?
            }
            ExprKind::Ternary(cond, a, b) => {
                self.check_condition(cond)?;
                self.check_expr(a)?;
                self.check_expr(b)?;
                if a.ty.is_numeric() && b.ty.is_numeric() {
                    arith_result(&a.ty, &b.ty).ok_or_else(|| {
                        Diagnostic::at(pos, "incompatible operand types in conditional expression")
                    })?
                } else if a.ty == b.ty {
                    a.ty.clone()
                } else {
                    return Err(Diagnostic::at(
                        pos,
                        "incompatible operand types in conditional expression",
                    ));
                }
            }
            ExprKind::Cast(target, operand) => {
                self.check_expr(operand)?;
                let ok = match (&*target, &operand.ty) {
                    (Type::Scalar(_), Type::Scalar(_)) => true,
                    (Type::Vector(_, n), Type::Vector(_, m)) => n == m,
                    (Type::Vector(_, _), Type::Scalar(_)) => true,
                    _ => false,
                };
                if !ok {
                    return Err(Diagnostic::at(
                        pos,
                        format!(
                            "cannot cast '{}' to '{}'",
                            self.name_of(&operand.ty),
                            self.name_of(target)
                        ),
                    ));
                }
                target.clone()
            }
            ExprKind::Index(base, index) => {
                self.check_expr(base)?;
                self.check_expr(index)?;
                if !matches!(index.ty, Type::Scalar(Scalar::Int | Scalar::Uint | Scalar::Bool)) {
                    return Err(Diagnostic::at(index.pos, "array subscript is not an integer"));
                }
                match &base.ty {
                    Type::Pointer { pointee, .. } => (**pointee).clone(),
                    Type::Vector(s, _) => Type::Scalar(*s),
                    other => {
                        return Err(Diagnostic::at(
                            pos,
                            format!(
                                "subscripted value of type '{}' is not a pointer or vector",
                                self.name_of(other)
                            ),
                        ));
                    }
                }
            }
            ExprKind::Member { base, name, access } => {
                self.check_expr(base)?;
                match &base.ty {
                    Type::Struct(i) => {
                        let s = &self.structs[*i];
                        let field = s.fields.iter().position(|f| f.name == *name).ok_or_else(|| {
                            Diagnostic::at(pos, format!("no member named '{name}' in '{}'", s.name))
                        })?;
                        *access = Access::Field(field);
                        s.fields[field].ty.clone()
                    }
                    Type::Vector(s, n) => {
                        let (lanes, len) = swizzle(name, *n).ok_or_else(|| {
                            Diagnostic::at(
                                pos,
                                format!("invalid swizzle '{name}' on '{}'", self.name_of(&base.ty)),
                            )
                        })?;
                        *access = Access::Swizzle { lanes, len };
                        if len == 1 {
                            Type::Scalar(*s)
                        } else {
                            Type::Vector(*s, len)
                        }
                    }
                    other => {
                        return Err(Diagnostic::at(
                            pos,
                            format!(
                                "member reference base type '{}' is not a structure",
                                self.name_of(other)
                            ),
                        ));
                    }
                }
            }
            ExprKind::Call { name, args, callee } => {
                for arg in args.iter_mut() {
                    self.check_expr(arg)?;
                }
                self.check_call(name, args, callee, pos)?
            }
        };
        expr.ty = ty;
        Ok(())
    }

    fn check_call(
        &self,
        name: &str,
        args: &[Expr],
        callee: &mut Callee,
        pos: Pos,
    ) -> Result<Type, Diagnostic> {
        let arg_count = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(Diagnostic::at(
                    pos,
                    format!("'{name}' expects {n} argument(s), {} provided", args.len()),
                ))
            }
        };
        if let Callee::Construct(ty) = callee {
            let ty = ty.clone();
            if args.iter().any(|a| !a.ty.is_numeric()) {
                return Err(Diagnostic::at(pos, format!("invalid arguments to '{name}'")));
            }
            match &ty {
                Type::Scalar(_) => {
                    arg_count(1)?;
                    if !matches!(args[0].ty, Type::Scalar(_)) {
                        return Err(Diagnostic::at(pos, format!("cannot convert to '{name}'")));
                    }
                }
                Type::Vector(_, n) => {
                    let total: usize = args
                        .iter()
                        .map(|a| a.ty.lanes().unwrap_or(0) as usize)
                        .sum();
                    let splat = args.len() == 1 && matches!(args[0].ty, Type::Scalar(_));
                    if !splat && total != *n as usize {
                        return Err(Diagnostic::at(
                            pos,
                            format!("'{name}' needs {n} components, {total} provided"),
                        ));
                    }
                }
                _ => return Err(Diagnostic::at(pos, format!("cannot construct '{name}'"))),
            }
            return Ok(ty);
        }
        if let Some(builtin) = BuiltinFn::from_name(name) {
            *callee = Callee::Builtin(builtin);
            if args.iter().any(|a| !a.ty.is_numeric()) {
                return Err(Diagnostic::at(pos, format!("invalid arguments to '{name}'")));
            }
            let mismatch = || Diagnostic::at(pos, format!("mismatched argument types to '{name}'"));
            return Ok(match builtin {
                BuiltinFn::Min | BuiltinFn::Max => {
                    arg_count(2)?;
                    arith_result(&args[0].ty, &args[1].ty).ok_or_else(mismatch)?
                }
                BuiltinFn::Clamp => {
                    arg_count(3)?;
                    let ab = arith_result(&args[0].ty, &args[1].ty).ok_or_else(mismatch)?;
                    arith_result(&ab, &args[2].ty).ok_or_else(mismatch)?
                }
                BuiltinFn::Abs => {
                    arg_count(1)?;
                    match &args[0].ty {
                        Type::Scalar(Scalar::Bool) => Type::INT,
                        t => t.clone(),
                    }
                }
                BuiltinFn::Sqrt
                | BuiltinFn::Sin
                | BuiltinFn::Cos
                | BuiltinFn::Exp
                | BuiltinFn::Log
                | BuiltinFn::Floor
                | BuiltinFn::Ceil
                | BuiltinFn::Fract
                | BuiltinFn::Saturate => {
                    arg_count(1)?;
                    to_float(&args[0].ty)
                }
                BuiltinFn::Pow => {
                    arg_count(2)?;
                    to_float(&arith_result(&args[0].ty, &args[1].ty).ok_or_else(mismatch)?)
                }
                BuiltinFn::Mix => {
                    arg_count(3)?;
                    let ab = arith_result(&args[0].ty, &args[1].ty).ok_or_else(mismatch)?;
                    to_float(&arith_result(&ab, &args[2].ty).ok_or_else(mismatch)?)
                }
                BuiltinFn::Dot => {
                    arg_count(2)?;
                    match (&args[0].ty, &args[1].ty) {
                        (Type::Vector(_, n), Type::Vector(_, m)) if n == m => Type::FLOAT,
                        _ => return Err(mismatch()),
                    }
                }
                BuiltinFn::Length => {
                    arg_count(1)?;
                    match &args[0].ty {
                        Type::Vector(_, _) => Type::FLOAT,
                        _ => return Err(mismatch()),
                    }
                }
                BuiltinFn::Normalize => {
                    arg_count(1)?;
                    match &args[0].ty {
                        t @ Type::Vector(_, _) => to_float(t),
                        _ => return Err(mismatch()),
                    }
                }
            });
        }
        let index = self
            .signatures
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Diagnostic::at(pos, format!("use of undeclared identifier '{name}'")))?;
        let signature = &self.signatures[index];
        if signature.stage.is_some() {
            return Err(Diagnostic::at(
                pos,
                format!("cannot call entry point '{name}'"),
            ));
        }
        arg_count(signature.params.len())?;
        for (arg, param) in args.iter().zip(&signature.params) {
            if !assignable(&arg.ty, param) {
                return Err(Diagnostic::at(
                    arg.pos,
                    format!(
                        "cannot pass '{}' as '{}'",
                        self.name_of(&arg.ty),
                        self.name_of(param)
                    ),
                ));
            }
        }
        *callee = Callee::Function(index);
        Ok(signature.ret.clone())
    }
}
