// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Tree-walking interpreter for checked shader modules.

Each invocation runs to completion on the calling thread.  Device memory is reached only
through [`Memory`], addressed by buffer argument index and byte offset, so the interpreter
never holds a pointer into a resource and every access is bounds checked by the implementor.

Integer arithmetic wraps.  Integer division by zero, out-of-bounds accesses and runaway loops
raise a [`Fault`], which aborts the pass that ran the invocation.
*/

use super::ast::*;
use super::check::arith_result;

/// Loop iterations one invocation may execute before it is considered hung.
pub(crate) const LOOP_BUDGET: u64 = 1 << 24;
const MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum Fault {
    #[error("out-of-bounds access of {len} bytes at offset {offset} of buffer {index}")]
    OutOfBounds { index: u32, offset: i64, len: usize },
    #[error("nothing is bound at buffer index {0}")]
    Unbound(u32),
    #[error("buffer index {0} is bound to read-only inline bytes")]
    ReadOnly(u32),
    #[error("integer division by zero")]
    DivideByZero,
    #[error("invocation exceeded its loop iteration budget")]
    LoopBudget,
    #[error("call depth exceeded {MAX_CALL_DEPTH}")]
    CallDepth,
    #[error("vector index {index} out of range for {len} lanes")]
    LaneOutOfRange { index: i64, len: u8 },
    #[error("type {0} cannot be stored in device memory")]
    NoLayout(String),
}

/// The buffer argument table an invocation runs against.
pub(crate) trait Memory {
    fn read(&self, index: u32, offset: usize, out: &mut [u8]) -> Result<(), Fault>;
    fn write(&self, index: u32, offset: usize, bytes: &[u8]) -> Result<(), Fault>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Sv {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
}

impl Sv {
    fn zero(scalar: Scalar) -> Sv {
        match scalar {
            Scalar::Bool => Sv::Bool(false),
            Scalar::Int => Sv::Int(0),
            Scalar::Uint => Sv::Uint(0),
            Scalar::Float => Sv::Float(0.0),
        }
    }

    pub(crate) fn convert(self, to: Scalar) -> Sv {
        match (self, to) {
            (v, Scalar::Bool) => Sv::Bool(v.as_bool()),
            (Sv::Bool(b), Scalar::Int) => Sv::Int(b as i32),
            (Sv::Int(i), Scalar::Int) => Sv::Int(i),
            (Sv::Uint(u), Scalar::Int) => Sv::Int(u as i32),
            (Sv::Float(f), Scalar::Int) => Sv::Int(f as i32),
            (Sv::Bool(b), Scalar::Uint) => Sv::Uint(b as u32),
            (Sv::Int(i), Scalar::Uint) => Sv::Uint(i as u32),
            (Sv::Uint(u), Scalar::Uint) => Sv::Uint(u),
            (Sv::Float(f), Scalar::Uint) => Sv::Uint(f as u32),
            (v, Scalar::Float) => Sv::Float(v.as_f32()),
        }
    }

    pub(crate) fn as_bool(self) -> bool {
        match self {
            Sv::Bool(b) => b,
            Sv::Int(i) => i != 0,
            Sv::Uint(u) => u != 0,
            Sv::Float(f) => f != 0.0,
        }
    }

    pub(crate) fn as_f32(self) -> f32 {
        match self {
            Sv::Bool(b) => b as u32 as f32,
            Sv::Int(i) => i as f32,
            Sv::Uint(u) => u as f32,
            Sv::Float(f) => f,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Sv::Bool(b) => b as i64,
            Sv::Int(i) => i as i64,
            Sv::Uint(u) => u as i64,
            Sv::Float(f) => f as i64,
        }
    }

    fn to_bytes(self) -> ([u8; 4], usize) {
        match self {
            Sv::Bool(b) => ([b as u8, 0, 0, 0], 1),
            Sv::Int(i) => (i.to_le_bytes(), 4),
            Sv::Uint(u) => (u.to_le_bytes(), 4),
            Sv::Float(f) => (f.to_le_bytes(), 4),
        }
    }

    fn from_bytes(scalar: Scalar, bytes: &[u8]) -> Sv {
        let word = |b: &[u8]| [b[0], b[1], b[2], b[3]];
        match scalar {
            Scalar::Bool => Sv::Bool(bytes[0] != 0),
            Scalar::Int => Sv::Int(i32::from_le_bytes(word(bytes))),
            Scalar::Uint => Sv::Uint(u32::from_le_bytes(word(bytes))),
            Scalar::Float => Sv::Float(f32::from_le_bytes(word(bytes))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Void,
    Scalar(Sv),
    Vector { len: u8, lanes: [Sv; 4] },
    Struct(Box<[Value]>),
    /// Points into the buffer bound at `index`.
    Pointer { index: u32, offset: i64 },
}

impl Value {
    pub(crate) fn zero(ty: &Type, structs: &[StructDef]) -> Value {
        match ty {
            Type::Void => Value::Void,
            Type::Scalar(s) => Value::Scalar(Sv::zero(*s)),
            Type::Vector(s, n) => Value::Vector {
                len: *n,
                lanes: [Sv::zero(*s); 4],
            },
            Type::Struct(i) => Value::Struct(
                structs[*i]
                    .fields
                    .iter()
                    .map(|f| Value::zero(&f.ty, structs))
                    .collect(),
            ),
            Type::Pointer { .. } => Value::Pointer {
                index: u32::MAX,
                offset: 0,
            },
        }
    }

    pub(crate) fn float4(v: [f32; 4]) -> Value {
        Value::Vector {
            len: 4,
            lanes: v.map(Sv::Float),
        }
    }

    /// The first `n` lanes of a scalar or vector, widened to f32.
    pub(crate) fn to_f32s(&self) -> Vec<f32> {
        match self {
            Value::Scalar(s) => vec![s.as_f32()],
            Value::Vector { len, lanes } => {
                lanes[..*len as usize].iter().map(|s| s.as_f32()).collect()
            }
            _ => Vec::new(),
        }
    }

    fn lanes(&self) -> Option<(u8, [Sv; 4])> {
        match self {
            Value::Scalar(s) => Some((1, [*s; 4])),
            Value::Vector { len, lanes } => Some((*len, *lanes)),
            _ => None,
        }
    }

    fn scalar(&self) -> Sv {
        match self {
            Value::Scalar(s) => *s,
            Value::Vector { lanes, .. } => lanes[0],
            _ => Sv::Bool(false),
        }
    }

    /// Implicit conversion to `ty`: scalar conversion, splat or lane-wise conversion.
    fn coerce(self, ty: &Type) -> Value {
        match (self, ty) {
            (Value::Scalar(s), Type::Scalar(to)) => Value::Scalar(s.convert(*to)),
            (Value::Scalar(s), Type::Vector(to, n)) => Value::Vector {
                len: *n,
                lanes: [s.convert(*to); 4],
            },
            (Value::Vector { lanes, .. }, Type::Vector(to, n)) => Value::Vector {
                len: *n,
                lanes: lanes.map(|l| l.convert(*to)),
            },
            (Value::Vector { lanes, .. }, Type::Scalar(to)) => Value::Scalar(lanes[0].convert(*to)),
            (v, _) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Field(usize),
    Lane(u8),
}

#[derive(Debug, Clone)]
enum Place {
    Local { slot: usize, path: Vec<Step> },
    Memory { index: u32, offset: i64 },
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Built-in inputs of one invocation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Inputs {
    pub(crate) thread_position_in_grid: [u32; 3],
    pub(crate) thread_position_in_threadgroup: [u32; 3],
    pub(crate) threadgroup_position_in_grid: [u32; 3],
    pub(crate) threads_per_threadgroup: [u32; 3],
    pub(crate) threads_per_grid: [u32; 3],
    pub(crate) vertex_id: u32,
    pub(crate) stage_in: Option<Value>,
}

pub(crate) struct Interpreter<'a, M: Memory + ?Sized> {
    module: &'a Module,
    memory: &'a M,
    loop_budget: u64,
    budget: u64,
    depth: usize,
}

impl<'a, M: Memory + ?Sized> Interpreter<'a, M> {
    pub(crate) fn new(module: &'a Module, memory: &'a M) -> Self {
        Interpreter {
            module,
            memory,
            loop_budget: LOOP_BUDGET,
            budget: LOOP_BUDGET,
            depth: 0,
        }
    }

    pub(crate) fn with_loop_budget(mut self, loop_budget: u64) -> Self {
        self.loop_budget = loop_budget;
        self
    }

    /// Runs the entry point `function` once and returns what it returned.
    pub(crate) fn run(&mut self, function: usize, inputs: &Inputs) -> Result<Value, Fault> {
        self.budget = self.loop_budget;
        self.depth = 0;
        let module = self.module;
        let f = &module.functions[function];
        let mut frame = vec![Value::Void; f.frame_size];
        for (slot, param) in f.params.iter().enumerate() {
            frame[slot] = match &param.attr {
                ParamAttr::Buffer(index) => Value::Pointer {
                    index: *index as u32,
                    offset: 0,
                },
                ParamAttr::Builtin(builtin) => {
                    let v = match builtin {
                        Builtin::ThreadPositionInGrid => inputs.thread_position_in_grid,
                        Builtin::ThreadPositionInThreadgroup => {
                            inputs.thread_position_in_threadgroup
                        }
                        Builtin::ThreadgroupPositionInGrid => inputs.threadgroup_position_in_grid,
                        Builtin::ThreadsPerThreadgroup => inputs.threads_per_threadgroup,
                        Builtin::ThreadsPerGrid => inputs.threads_per_grid,
                        Builtin::VertexId => [inputs.vertex_id, 0, 0],
                    };
                    Value::Vector {
                        len: 3,
                        lanes: [Sv::Uint(v[0]), Sv::Uint(v[1]), Sv::Uint(v[2]), Sv::Uint(0)],
                    }
                    .coerce(&param.ty)
                }
                ParamAttr::StageIn => match &inputs.stage_in {
                    Some(v) => v.clone(),
                    None => Value::zero(&param.ty, &self.module.structs),
                },
                ParamAttr::None => Value::zero(&param.ty, &self.module.structs),
            };
        }
        self.body(f, &mut frame)
    }

    fn body(&mut self, f: &Function, frame: &mut [Value]) -> Result<Value, Fault> {
        for stmt in &f.body {
            if let Flow::Return(v) = self.exec(frame, stmt)? {
                return Ok(v.coerce(&f.ret));
            }
        }
        Ok(Value::zero(&f.ret, &self.module.structs))
    }

    fn tick(&mut self) -> Result<(), Fault> {
        if self.budget == 0 {
            return Err(Fault::LoopBudget);
        }
        self.budget -= 1;
        Ok(())
    }

    fn exec_all(&mut self, frame: &mut [Value], stmts: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in stmts {
            match self.exec(frame, stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, frame: &mut [Value], stmt: &Stmt) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Decl { ty, slot, init, .. } => {
                frame[*slot] = match init {
                    Some(init) => self.eval(frame, init)?.coerce(ty),
                    None => Value::zero(ty, &self.module.structs),
                };
            }
            Stmt::Assign {
                target, op, value, ..
            } => {
                let place = self.place(frame, target)?;
                let rhs = self.eval(frame, value)?;
                let result = match op {
                    None => rhs,
                    Some(op) => {
                        let current = self.load(frame, &place, &target.ty)?;
                        let result_ty = if op.is_comparison() || op.is_logical() {
                            Type::BOOL
                        } else {
                            arith_result(&target.ty, &value.ty).unwrap_or_else(|| target.ty.clone())
                        };
                        self.binary(*op, current, &target.ty, rhs, &value.ty, &result_ty)?
                    }
                };
                self.store(frame, &place, result.coerce(&target.ty), &target.ty)?;
            }
            Stmt::Step { target, delta, .. } => {
                let place = self.place(frame, target)?;
                let current = self.load(frame, &place, &target.ty)?.scalar();
                let next = match current {
                    Sv::Int(i) => Sv::Int(i.wrapping_add(*delta as i32)),
                    Sv::Uint(u) => Sv::Uint(u.wrapping_add_signed(*delta as i32)),
                    Sv::Float(f) => Sv::Float(f + *delta as f32),
                    Sv::Bool(b) => Sv::Bool(b),
                };
                self.store(frame, &place, Value::Scalar(next), &target.ty)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(frame, cond)?.scalar().as_bool() {
                    return self.exec(frame, then);
                } else if let Some(otherwise) = otherwise {
                    return self.exec(frame, otherwise);
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.exec(frame, init)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.eval(frame, cond)?.scalar().as_bool() {
                            break;
                        }
                    }
                    self.tick()?;
                    match self.exec(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(step) = step {
                        self.exec(frame, step)?;
                    }
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(frame, cond)?.scalar().as_bool() {
                    self.tick()?;
                    match self.exec(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Return(value, _) => {
                let v = match value {
                    Some(v) => self.eval(frame, v)?,
                    None => Value::Void,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::Break(_) => return Ok(Flow::Break),
            Stmt::Continue(_) => return Ok(Flow::Continue),
            Stmt::Block(stmts) => return self.exec_all(frame, stmts),
            Stmt::Expr(expr) => {
                self.eval(frame, expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn stride(&self, ty: &Type) -> Result<i64, Fault> {
        ty.layout(&self.module.structs)
            .map(|(size, _)| size as i64)
            .ok_or_else(|| Fault::NoLayout(self.module.type_name(ty)))
    }

    /// Resolves an lvalue.  `None` for expressions with no storage, such as call results.
    fn place_of(&mut self, frame: &mut [Value], expr: &Expr) -> Result<Option<Place>, Fault> {
        Ok(match &expr.kind {
            ExprKind::Var {
                slot, by_ref: false, ..
            } => Some(Place::Local {
                slot: *slot,
                path: Vec::new(),
            }),
            ExprKind::Var {
                slot, by_ref: true, ..
            } => match frame[*slot] {
                Value::Pointer { index, offset } => Some(Place::Memory { index, offset }),
                _ => None,
            },
            ExprKind::Index(base, index) => match &base.ty {
                Type::Pointer { pointee, .. } => {
                    let stride = self.stride(pointee)?;
                    let Value::Pointer { index: binding, offset } = self.eval(frame, base)? else {
                        return Ok(None);
                    };
                    let i = self.eval(frame, index)?.scalar().as_i64();
                    Some(Place::Memory {
                        index: binding,
                        offset: offset + i * stride,
                    })
                }
                Type::Vector(_, len) => {
                    let len = *len;
                    let base_place = self.place_of(frame, base)?;
                    let i = self.eval(frame, index)?.scalar().as_i64();
                    if i < 0 || i >= len as i64 {
                        return Err(Fault::LaneOutOfRange { index: i, len });
                    }
                    match base_place {
                        Some(Place::Local { slot, mut path }) => {
                            path.push(Step::Lane(i as u8));
                            Some(Place::Local { slot, path })
                        }
                        Some(Place::Memory { index, offset }) => Some(Place::Memory {
                            index,
                            offset: offset + i * 4,
                        }),
                        None => None,
                    }
                }
                _ => None,
            },
            ExprKind::Member { base, access, .. } => {
                let step = match (access, &base.ty) {
                    (Access::Field(i), Type::Struct(s)) => {
                        (Step::Field(*i), self.module.structs[*s].fields[*i].offset as i64)
                    }
                    (Access::Swizzle { lanes, len: 1 }, _) => {
                        (Step::Lane(lanes[0]), lanes[0] as i64 * 4)
                    }
                    _ => return Ok(None),
                };
                match self.place_of(frame, base)? {
                    Some(Place::Local { slot, mut path }) => {
                        path.push(step.0);
                        Some(Place::Local { slot, path })
                    }
                    Some(Place::Memory { index, offset }) => Some(Place::Memory {
                        index,
                        offset: offset + step.1,
                    }),
                    None => None,
                }
            }
            _ => None,
        })
    }

    fn place(&mut self, frame: &mut [Value], expr: &Expr) -> Result<Place, Fault> {
        // the checker only admits assignable targets
        self.place_of(frame, expr)?
            .ok_or_else(|| Fault::NoLayout(self.module.type_name(&expr.ty)))
    }

    fn load(&self, frame: &[Value], place: &Place, ty: &Type) -> Result<Value, Fault> {
        match place {
            Place::Local { slot, path } => {
                let mut v = &frame[*slot];
                for step in path {
                    match (step, v) {
                        (Step::Field(i), Value::Struct(fields)) => v = &fields[*i],
                        (Step::Lane(i), Value::Vector { lanes, .. }) => {
                            return Ok(Value::Scalar(lanes[*i as usize]));
                        }
                        _ => break,
                    }
                }
                Ok(v.clone())
            }
            Place::Memory { index, offset } => self.read(*index, *offset, ty),
        }
    }

    fn store(
        &self,
        frame: &mut [Value],
        place: &Place,
        value: Value,
        ty: &Type,
    ) -> Result<(), Fault> {
        match place {
            Place::Local { slot, path } => {
                let mut v = &mut frame[*slot];
                for step in path {
                    match (step, v) {
                        (Step::Field(i), Value::Struct(fields)) => v = &mut fields[*i],
                        (Step::Lane(i), Value::Vector { lanes, .. }) => {
                            lanes[*i as usize] = value.scalar();
                            return Ok(());
                        }
                        (_, other) => {
                            v = other;
                            break;
                        }
                    }
                }
                *v = value;
                Ok(())
            }
            Place::Memory { index, offset } => self.write(*index, *offset, &value, ty),
        }
    }

    fn checked_offset(index: u32, offset: i64, len: usize) -> Result<usize, Fault> {
        usize::try_from(offset).map_err(|_| Fault::OutOfBounds { index, offset, len })
    }

    fn read(&self, index: u32, offset: i64, ty: &Type) -> Result<Value, Fault> {
        match ty {
            Type::Scalar(s) => {
                let len = if *s == Scalar::Bool { 1 } else { 4 };
                let mut bytes = [0u8; 4];
                let at = Self::checked_offset(index, offset, len)?;
                self.memory.read(index, at, &mut bytes[..len])?;
                Ok(Value::Scalar(Sv::from_bytes(*s, &bytes)))
            }
            Type::Vector(s, n) if *s != Scalar::Bool => {
                let len = *n as usize * 4;
                let mut bytes = [0u8; 16];
                let at = Self::checked_offset(index, offset, len)?;
                self.memory.read(index, at, &mut bytes[..len])?;
                let mut lanes = [Sv::zero(*s); 4];
                for (i, lane) in lanes.iter_mut().take(*n as usize).enumerate() {
                    *lane = Sv::from_bytes(*s, &bytes[i * 4..]);
                }
                Ok(Value::Vector { len: *n, lanes })
            }
            Type::Struct(i) => {
                let fields = self.module.structs[*i]
                    .fields
                    .iter()
                    .map(|f| self.read(index, offset + f.offset as i64, &f.ty))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Struct(fields.into_boxed_slice()))
            }
            other => Err(Fault::NoLayout(self.module.type_name(other))),
        }
    }

    fn write(&self, index: u32, offset: i64, value: &Value, ty: &Type) -> Result<(), Fault> {
        match (ty, value) {
            (Type::Scalar(s), v) => {
                let (bytes, len) = v.scalar().convert(*s).to_bytes();
                let at = Self::checked_offset(index, offset, len)?;
                self.memory.write(index, at, &bytes[..len])
            }
            (Type::Vector(s, n), Value::Vector { lanes, .. }) if *s != Scalar::Bool => {
                let mut bytes = [0u8; 16];
                for (i, lane) in lanes.iter().take(*n as usize).enumerate() {
                    bytes[i * 4..i * 4 + 4].copy_from_slice(&lane.convert(*s).to_bytes().0);
                }
                let len = *n as usize * 4;
                let at = Self::checked_offset(index, offset, len)?;
                self.memory.write(index, at, &bytes[..len])
            }
            (Type::Struct(i), Value::Struct(values)) => {
                for (field, v) in self.module.structs[*i].fields.iter().zip(values.iter()) {
                    self.write(index, offset + field.offset as i64, v, &field.ty)?;
                }
                Ok(())
            }
            (other, _) => Err(Fault::NoLayout(self.module.type_name(other))),
        }
    }

    fn eval(&mut self, frame: &mut [Value], expr: &Expr) -> Result<Value, Fault> {
        match &expr.kind {
            ExprKind::Int { value, .. } => Ok(match expr.ty {
                Type::Scalar(Scalar::Uint) => Value::Scalar(Sv::Uint(*value as u32)),
                _ => Value::Scalar(Sv::Int(*value as i32)),
            }),
            ExprKind::Float(f) => Ok(Value::Scalar(Sv::Float(*f))),
            ExprKind::Bool(b) => Ok(Value::Scalar(Sv::Bool(*b))),
            ExprKind::Var { .. } | ExprKind::Index(..) | ExprKind::Member { .. } => {
                if let Some(place) = self.place_of(frame, expr)? {
                    return self.load(frame, &place, &expr.ty);
                }
                self.eval_projection(frame, expr)
            }
            ExprKind::Unary(op, operand) => {
                let v = self.eval(frame, operand)?;
                let Some((len, lanes)) = v.coerce(&expr.ty).lanes() else {
                    return Ok(Value::Void);
                };
                let apply = |s: Sv| match (op, s) {
                    (UnOp::Not, s) => Sv::Bool(!s.as_bool()),
                    (UnOp::Neg, Sv::Int(i)) => Sv::Int(i.wrapping_neg()),
                    (UnOp::Neg, Sv::Uint(u)) => Sv::Uint(u.wrapping_neg()),
                    (UnOp::Neg, Sv::Float(f)) => Sv::Float(-f),
                    (UnOp::BitNot, Sv::Int(i)) => Sv::Int(!i),
                    (UnOp::BitNot, Sv::Uint(u)) => Sv::Uint(!u),
                    (_, s) => s,
                };
                Ok(rebuild(&expr.ty, len, lanes.map(apply)))
            }
            ExprKind::Binary(op, l, r) => {
                if op.is_logical() {
                    let left = self.eval(frame, l)?.scalar().as_bool();
                    let short = match op {
                        BinOp::And => !left,
                        _ => left,
                    };
                    if short {
                        return Ok(Value::Scalar(Sv::Bool(left)));
                    }
                    let right = self.eval(frame, r)?.scalar().as_bool();
                    return Ok(Value::Scalar(Sv::Bool(right)));
                }
                let lv = self.eval(frame, l)?;
                let rv = self.eval(frame, r)?;
                self.binary(*op, lv, &l.ty, rv, &r.ty, &expr.ty)
            }
            ExprKind::Ternary(cond, a, b) => {
                let chosen = if self.eval(frame, cond)?.scalar().as_bool() {
                    a
                } else {
                    b
                };
                Ok(self.eval(frame, chosen)?.coerce(&expr.ty))
            }
            ExprKind::Cast(ty, operand) => Ok(self.eval(frame, operand)?.coerce(ty)),
            ExprKind::Call { args, callee, .. } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(frame, arg)?);
                }
                match callee {
                    Callee::Construct(ty) => Ok(construct(ty, values)),
                    Callee::Builtin(f) => Ok(builtin(*f, values, &expr.ty)),
                    Callee::Function(index) => self.call(*index, values),
                    Callee::Unresolved => Ok(Value::Void),
                }
            }
        }
    }

    /// Member and index access on values without storage.
    fn eval_projection(&mut self, frame: &mut [Value], expr: &Expr) -> Result<Value, Fault> {
        match &expr.kind {
            ExprKind::Member { base, access, .. } => {
                let base = self.eval(frame, base)?;
                Ok(match (access, base) {
                    (Access::Field(i), Value::Struct(fields)) => fields[*i].clone(),
                    (Access::Swizzle { lanes, len }, v) => {
                        let (_, source) = v.lanes().unwrap_or((1, [Sv::Bool(false); 4]));
                        if *len == 1 {
                            Value::Scalar(source[lanes[0] as usize])
                        } else {
                            Value::Vector {
                                len: *len,
                                lanes: lanes.map(|l| source[l as usize]),
                            }
                        }
                    }
                    _ => Value::Void,
                })
            }
            ExprKind::Index(base, index) => {
                let base = self.eval(frame, base)?;
                let i = self.eval(frame, index)?.scalar().as_i64();
                match base {
                    Value::Vector { len, lanes } => {
                        if i < 0 || i >= len as i64 {
                            return Err(Fault::LaneOutOfRange { index: i, len });
                        }
                        Ok(Value::Scalar(lanes[i as usize]))
                    }
                    _ => Ok(Value::Void),
                }
            }
            _ => Ok(Value::Void),
        }
    }

    fn call(&mut self, index: usize, args: Vec<Value>) -> Result<Value, Fault> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Fault::CallDepth);
        }
        let module = self.module;
        let f = &module.functions[index];
        let mut frame = vec![Value::Void; f.frame_size];
        for ((slot, arg), param) in frame.iter_mut().zip(args).zip(&f.params) {
            *slot = arg.coerce(&param.ty);
        }
        self.depth += 1;
        let result = self.body(f, &mut frame);
        self.depth -= 1;
        result
    }

    fn binary(
        &self,
        op: BinOp,
        l: Value,
        lt: &Type,
        r: Value,
        rt: &Type,
        result: &Type,
    ) -> Result<Value, Fault> {
        if op.is_comparison() {
            let common = Scalar::common(
                lt.scalar().unwrap_or(Scalar::Int),
                rt.scalar().unwrap_or(Scalar::Int),
            );
            let a = l.scalar().convert(common);
            let b = r.scalar().convert(common);
            let ordering = match (a, b) {
                (Sv::Float(x), Sv::Float(y)) => x.partial_cmp(&y),
                (Sv::Uint(x), Sv::Uint(y)) => Some(x.cmp(&y)),
                (x, y) => Some(x.as_i64().cmp(&y.as_i64())),
            };
            use std::cmp::Ordering::*;
            let truth = match (op, ordering) {
                (BinOp::Ne, None) => true,
                (_, None) => false,
                (BinOp::Lt, Some(o)) => o == Less,
                (BinOp::Le, Some(o)) => o != Greater,
                (BinOp::Gt, Some(o)) => o == Greater,
                (BinOp::Ge, Some(o)) => o != Less,
                (BinOp::Eq, Some(o)) => o == Equal,
                (_, Some(o)) => o != Equal,
            };
            return Ok(Value::Scalar(Sv::Bool(truth)));
        }
        let (Some((len, a)), Some((_, b))) = (l.coerce(result).lanes(), r.coerce(result).lanes())
        else {
            return Ok(Value::Void);
        };
        let mut out = a;
        for i in 0..len as usize {
            out[i] = lane_op(op, a[i], b[i])?;
        }
        Ok(rebuild(result, len, out))
    }
}

fn rebuild(ty: &Type, len: u8, lanes: [Sv; 4]) -> Value {
    match ty {
        Type::Vector(..) => Value::Vector { len, lanes },
        _ => Value::Scalar(lanes[0]),
    }
}

fn lane_op(op: BinOp, a: Sv, b: Sv) -> Result<Sv, Fault> {
    Ok(match (a, b) {
        (Sv::Int(x), Sv::Int(y)) => Sv::Int(match op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div | BinOp::Rem if y == 0 => return Err(Fault::DivideByZero),
            BinOp::Div => x.wrapping_div(y),
            BinOp::Rem => x.wrapping_rem(y),
            BinOp::BitAnd => x & y,
            BinOp::BitOr => x | y,
            BinOp::BitXor => x ^ y,
            BinOp::Shl => x.wrapping_shl(y as u32),
            BinOp::Shr => x.wrapping_shr(y as u32),
            _ => x,
        }),
        (Sv::Uint(x), Sv::Uint(y)) => Sv::Uint(match op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div | BinOp::Rem if y == 0 => return Err(Fault::DivideByZero),
            BinOp::Div => x / y,
            BinOp::Rem => x % y,
            BinOp::BitAnd => x & y,
            BinOp::BitOr => x | y,
            BinOp::BitXor => x ^ y,
            BinOp::Shl => x.wrapping_shl(y),
            BinOp::Shr => x.wrapping_shr(y),
            _ => x,
        }),
        (Sv::Float(x), Sv::Float(y)) => Sv::Float(match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
            _ => x,
        }),
        (x, _) => x,
    })
}

fn construct(ty: &Type, args: Vec<Value>) -> Value {
    match ty {
        Type::Vector(s, n) => {
            if let [single @ Value::Scalar(_)] = args.as_slice() {
                return single.clone().coerce(ty);
            }
            let mut lanes = [Sv::zero(*s); 4];
            let mut next = 0;
            for arg in &args {
                if let Some((len, source)) = arg.lanes() {
                    for lane in source.iter().take(len as usize) {
                        if next < *n as usize {
                            lanes[next] = lane.convert(*s);
                            next += 1;
                        }
                    }
                }
            }
            Value::Vector { len: *n, lanes }
        }
        _ => args
            .into_iter()
            .next()
            .map(|v| v.coerce(ty))
            .unwrap_or(Value::Void),
    }
}

fn builtin(f: BuiltinFn, args: Vec<Value>, result: &Type) -> Value {
    let lanes_of = |v: &Value, ty: &Type| {
        v.clone()
            .coerce(ty)
            .lanes()
            .unwrap_or((1, [Sv::Float(0.0); 4]))
    };
    match f {
        BuiltinFn::Dot | BuiltinFn::Length | BuiltinFn::Normalize => {
            let n = match &args[0] {
                Value::Vector { len, .. } => *len,
                _ => 1,
            };
            let float_n = Type::Vector(Scalar::Float, n);
            let (_, a) = lanes_of(&args[0], &float_n);
            let (_, b) = if f == BuiltinFn::Dot {
                lanes_of(&args[1], &float_n)
            } else {
                (n, a)
            };
            let dot: f32 = (0..n as usize).map(|i| a[i].as_f32() * b[i].as_f32()).sum();
            match f {
                BuiltinFn::Dot => Value::Scalar(Sv::Float(dot)),
                BuiltinFn::Length => Value::Scalar(Sv::Float(dot.sqrt())),
                _ => {
                    let inv = 1.0 / dot.sqrt();
                    Value::Vector {
                        len: n,
                        lanes: a.map(|l| Sv::Float(l.as_f32() * inv)),
                    }
                }
            }
        }
        _ => {
            let lanes: Vec<[Sv; 4]> = args.iter().map(|a| lanes_of(a, result).1).collect();
            let len = result.lanes().unwrap_or(1);
            let mut out = [Sv::zero(result.scalar().unwrap_or(Scalar::Float)); 4];
            for i in 0..len as usize {
                let x = lanes[0][i];
                let y = lanes.get(1).map(|l| l[i]);
                let z = lanes.get(2).map(|l| l[i]);
                out[i] = lane_builtin(f, x, y, z);
            }
            rebuild(result, len, out)
        }
    }
}

fn min_sv(a: Sv, b: Sv) -> Sv {
    match (a, b) {
        (Sv::Float(x), Sv::Float(y)) => Sv::Float(x.min(y)),
        (Sv::Int(x), Sv::Int(y)) => Sv::Int(x.min(y)),
        (Sv::Uint(x), Sv::Uint(y)) => Sv::Uint(x.min(y)),
        (x, _) => x,
    }
}

fn max_sv(a: Sv, b: Sv) -> Sv {
    match (a, b) {
        (Sv::Float(x), Sv::Float(y)) => Sv::Float(x.max(y)),
        (Sv::Int(x), Sv::Int(y)) => Sv::Int(x.max(y)),
        (Sv::Uint(x), Sv::Uint(y)) => Sv::Uint(x.max(y)),
        (x, _) => x,
    }
}

fn lane_builtin(f: BuiltinFn, x: Sv, y: Option<Sv>, z: Option<Sv>) -> Sv {
    let y = y.unwrap_or(x);
    let z = z.unwrap_or(x);
    let float = |g: fn(f32) -> f32| Sv::Float(g(x.as_f32()));
    match f {
        BuiltinFn::Min => min_sv(x, y),
        BuiltinFn::Max => max_sv(x, y),
        BuiltinFn::Clamp => min_sv(max_sv(x, y), z),
        BuiltinFn::Abs => match x {
            Sv::Int(i) => Sv::Int(i.wrapping_abs()),
            Sv::Float(v) => Sv::Float(v.abs()),
            other => other,
        },
        BuiltinFn::Sqrt => float(f32::sqrt),
        BuiltinFn::Sin => float(f32::sin),
        BuiltinFn::Cos => float(f32::cos),
        BuiltinFn::Exp => float(f32::exp),
        BuiltinFn::Log => float(f32::ln),
        BuiltinFn::Floor => float(f32::floor),
        BuiltinFn::Ceil => float(f32::ceil),
        BuiltinFn::Fract => float(|v| v - v.floor()),
        BuiltinFn::Saturate => float(|v| v.clamp(0.0, 1.0)),
        BuiltinFn::Pow => Sv::Float(x.as_f32().powf(y.as_f32())),
        BuiltinFn::Mix => {
            let (a, b, t) = (x.as_f32(), y.as_f32(), z.as_f32());
            Sv::Float(a + (b - a) * t)
        }
        BuiltinFn::Dot | BuiltinFn::Length | BuiltinFn::Normalize => x,
    }
}

/// Splits a vertex function's return value into its clip-space position and the remaining
/// members flattened to floats, in declaration order.
pub(crate) fn split_vertex_output(
    module: &Module,
    ty: &Type,
    value: &Value) -> ([f32; 4], Vec<f32>,
) {
    let mut position = [0.0, 0.0, 0.0, 1.0];
    let mut varyings = Vec::new();
    match (ty, value) {
        (Type::Struct(i), Value::Struct(fields)) => {
            for (field, v) in module.structs[*i].fields.iter().zip(fields.iter()) {
                let lanes = v.to_f32s();
                if field.position {
                    for (p, l) in position.iter_mut().zip(lanes) {
                        *p = l;
                    }
                } else {
                    varyings.extend(lanes);
                }
            }
        }
        (_, v) => {
            for (p, l) in position.iter_mut().zip(v.to_f32s()) {
                *p = l;
            }
        }
    }
    (position, varyings)
}

/// Rebuilds a fragment function's `[[stage_in]]` value from the interpolated varyings.
/// `position` is the fragment's window-space position.
pub(crate) fn assemble_stage_in(
    module: &Module,
    ty: &Type,
    position: [f32; 4],
    varyings: &[f32],
) -> Value {
    match ty {
        Type::Struct(i) => {
            let mut next = 0;
            let fields = module.structs[*i]
                .fields
                .iter()
                .map(|field| {
                    if field.position {
                        return Value::float4(position).coerce(&field.ty);
                    }
                    let n = field.ty.lanes().unwrap_or(0) as usize;
                    let mut lanes = [Sv::Float(0.0); 4];
                    for (lane, v) in lanes.iter_mut().zip(varyings.iter().skip(next)).take(n) {
                        *lane = Sv::Float(*v);
                    }
                    next += n;
                    match field.ty {
                        Type::Scalar(_) => Value::Scalar(lanes[0]).coerce(&field.ty),
                        _ => Value::Vector {
                            len: n as u8,
                            lanes,
                        }
                        .coerce(&field.ty),
                    }
                })
                .collect();
            Value::Struct(fields)
        }
        _ => Value::float4(position),
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;
    use std::cell::RefCell;

    struct Buffers(RefCell<Vec<Vec<u8>>>);

    impl Memory for Buffers {
        fn read(&self, index: u32, offset: usize, out: &mut [u8]) -> Result<(), Fault> {
            let buffers = self.0.borrow();
            let b = buffers.get(index as usize).ok_or(Fault::Unbound(index))?;
            let src = b.get(offset..offset + out.len()).ok_or(Fault::OutOfBounds {
                index,
                offset: offset as i64,
                len: out.len(),
            })?;
            out.copy_from_slice(src);
            Ok(())
        }

        fn write(&self, index: u32, offset: usize, bytes: &[u8]) -> Result<(), Fault> {
            let mut buffers = self.0.borrow_mut();
            let b = buffers.get_mut(index as usize).ok_or(Fault::Unbound(index))?;
            let len = b.len();
            let dst = b.get_mut(offset..offset + bytes.len()).ok_or(Fault::OutOfBounds {
                index,
                offset: offset as i64,
                len: bytes.len().min(len),
            })?;
            dst.copy_from_slice(bytes);
            Ok(())
        }
    }

    fn floats(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn read_floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn run_grid(
        source: &str,
        name: &str,
        buffers: Vec<Vec<u8>>,
        threads: u32,
    ) -> Result<Vec<Vec<u8>>, Fault> {
        let module = compile(source).unwrap();
        let entry = module.entry_point(name).unwrap();
        let memory = Buffers(RefCell::new(buffers));
        let mut interp = Interpreter::new(&module, &memory).with_loop_budget(10_000);
        for t in 0..threads {
            let inputs = Inputs {
                thread_position_in_grid: [t, 0, 0],
                threads_per_grid: [threads, 1, 1],
                ..Inputs::default()
            };
            interp.run(entry, &inputs)?;
        }
        Ok(memory.0.into_inner())
    }

    #[test]
    fn adds_arrays() {
        let out = run_grid(
            "kernel void add(device const float* a [[buffer(0)]], device const float* b [[buffer(1)]],
                             device float* c [[buffer(2)]], uint i [[thread_position_in_grid]]) {
                c[i] = a[i] + b[i];
            }",
            "add",
            vec![floats(&[1.0, 2.0, 3.0]), floats(&[10.0, 20.0, 30.0]), vec![0; 12]],
            3,
        )
        .unwrap();
        assert_eq!(read_floats(&out[2]), [11.0, 22.0, 33.0]);
    }

    #[test]
    fn control_flow_helpers_and_structs() {
        let out = run_grid(
            "struct Pair { uint a; float4 b; };
             uint fib(uint n) {
                 uint x = 0; uint y = 1;
                 for (uint i = 0; i < n; i++) { uint t = x + y; x = y; y = t; }
                 return x;
             }
             kernel void k(device Pair* pairs [[buffer(0)]], uint i [[thread_position_in_grid]]) {
                 Pair p;
                 p.a = fib(i + 5);
                 p.b = float4(1.0, 2.0, 3.0, 4.0).wzyx;
                 p.b.x += 0.5;
                 int n = 0;
                 while (true) { n++; if (n >= 3) { break; } }
                 p.b.y = n > 2 ? float(n) : -1.0;
                 pairs[i] = p;
             }",
            "k",
            vec![vec![0; 64]],
            2,
        )
        .unwrap();
        let words = &out[0];
        let a0 = u32::from_le_bytes(words[0..4].try_into().unwrap());
        let a1 = u32::from_le_bytes(words[32..36].try_into().unwrap());
        assert_eq!((a0, a1), (5, 8));
        assert_eq!(read_floats(&words[16..32]), [4.5, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn faults_instead_of_corrupting() {
        let source = "kernel void k(device uint* out [[buffer(0)]], uint i [[thread_position_in_grid]]) {
                          out[i + 4] = 1u;
                      }";
        let err = run_grid(source, "k", vec![vec![0; 16]], 1).unwrap_err();
        assert!(matches!(err, Fault::OutOfBounds { index: 0, offset: 16, .. }));

        let spin =
            "kernel void k(device uint* out [[buffer(0)]]) { while (true) { out[0] += 1u; } }";
        assert_eq!(run_grid(spin, "k", vec![vec![0; 4]], 1).unwrap_err(), Fault::LoopBudget);

        let div = "kernel void k(device int* out [[buffer(0)]]) { out[0] = 7 / out[1]; }";
        assert_eq!(run_grid(div, "k", vec![vec![0; 8]], 1).unwrap_err(), Fault::DivideByZero);
    }

    #[test]
    fn vertex_output_round_trips_into_stage_in() {
        let module = compile(
            "struct V { float4 position [[position]]; float3 color; float w; };
             vertex V vs(uint id [[vertex_id]]) {
                 V out;
                 out.position = float4(float(id), 0.0, 0.0, 1.0);
                 out.color = float3(0.25, 0.5, 0.75);
                 out.w = 2.0;
                 return out;
             }
             fragment float4 fs(V in [[stage_in]]) { return float4(in.color, in.w); }",
        )
        .unwrap();
        let memory = Buffers(RefCell::new(vec![]));
        let mut interp = Interpreter::new(&module, &memory);
        let vs = module.entry_point("vs").unwrap();
        let out = interp
            .run(vs, &Inputs { vertex_id: 3, ..Inputs::default() })
            .unwrap();
        let (position, varyings) = split_vertex_output(&module, &module.functions[vs].ret, &out);
        assert_eq!(position, [3.0, 0.0, 0.0, 1.0]);
        assert_eq!(varyings, [0.25, 0.5, 0.75, 2.0]);

        let fs = module.entry_point("fs").unwrap();
        let stage_in_ty = module.functions[fs].stage_in().unwrap().ty.clone();
        let stage_in = assemble_stage_in(&module, &stage_in_ty, [0.5, 0.5, 0.0, 1.0], &varyings);
        let color = interp
            .run(fs, &Inputs { stage_in: Some(stage_in), ..Inputs::default() })
            .unwrap();
        assert_eq!(color.to_f32s(), [0.25, 0.5, 0.75, 2.0]);
    }
}
