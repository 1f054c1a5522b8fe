//! Lexical-scope resolution, upvalue discovery, type checking, and bytecode
//! emission.
//!
//! Each active function being compiled owns a [`FuncScope`]: a stack of
//! block scopes (for nested `if`/`while`/function bodies) plus the list of
//! upvalues it has had to materialize so far. `resolve_binding` walks this
//! stack of scopes outward, and when a name is found only in an enclosing
//! function, it is captured as a new upvalue at every function boundary in
//! between -- so a variable three functions up arrives as a chain of
//! upvalues, one per intervening closure, exactly mirroring how `MAKE_FUNC`
//! expects to find it at each level.

use crate::ast::{BinaryOp, Block, Expr, FunctionLiteral, Literal, Stmt, UnaryOp};
use crate::types::{FunctionType, ListType, Type};
use somire_core::{Chunk, FunctionChunk, Heap, Op};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    UndefinedIdentifier { name: String, line: usize },
    AssignToNonLocal { name: String, line: usize },
    TypeMismatch { message: String, line: usize },
    ArityMismatch { expected: usize, got: usize, line: usize },
    TooManyLocals { line: usize },
    TooManyUpvalues { line: usize },
    TooManyFunctions { line: usize },
    TooManyArgs { line: usize },
    JumpTooFar { message: String, line: usize },
    Internal(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UndefinedIdentifier { name, line } => {
                write!(f, "undefined identifier '{name}' (line {line})")
            }
            CompileError::AssignToNonLocal { name, line } => {
                write!(f, "cannot assign to '{name}': not a local or captured variable (line {line})")
            }
            CompileError::TypeMismatch { message, line } => write!(f, "{message} (line {line})"),
            CompileError::ArityMismatch { expected, got, line } => {
                write!(f, "expected {expected} argument(s), got {got} (line {line})")
            }
            CompileError::TooManyLocals { line } => write!(f, "too many locals in one function (line {line})"),
            CompileError::TooManyUpvalues { line } => write!(f, "too many captured variables in one function (line {line})"),
            CompileError::TooManyFunctions { line } => write!(f, "too many function literals in one program (line {line})"),
            CompileError::TooManyArgs { line } => write!(f, "too many arguments in one call (line {line})"),
            CompileError::JumpTooFar { message, line } => write!(f, "{message} (line {line})"),
            CompileError::Internal(message) => write!(f, "internal compiler error: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone)]
enum Binding {
    Local(u16, Type),
    Upvalue(u16, Type),
}

impl Binding {
    fn ty(&self) -> Type {
        match self {
            Binding::Local(_, t) | Binding::Upvalue(_, t) => t.clone(),
        }
    }

    /// The signed index a function uses to address this binding in its own
    /// `LOCAL`/`SET_LOCAL` instructions.
    fn encode(&self) -> i16 {
        match self {
            Binding::Local(idx, _) => *idx as i16,
            Binding::Upvalue(idx, _) => -(*idx as i16) - 1,
        }
    }
}

struct LocalVar {
    name: String,
    index: u16,
    ty: Type,
}

struct UpvalueDesc {
    name: String,
    raw: i16,
    ty: Type,
}

struct FuncScope {
    blocks: Vec<Vec<LocalVar>>,
    next_local: u32,
    upvalues: Vec<UpvalueDesc>,
    code: FunctionChunk,
    return_type: Option<Type>,
}

impl FuncScope {
    fn new() -> FuncScope {
        FuncScope { blocks: vec![Vec::new()], next_local: 0, upvalues: Vec::new(), code: FunctionChunk::new(), return_type: None }
    }
}

fn global_env() -> Vec<(&'static str, Type)> {
    vec![
        ("log", Type::Macro),
        ("repr", Type::Function(FunctionType { params: vec![Type::Any], result: Box::new(Type::Str) })),
        ("write", Type::Function(FunctionType { params: vec![Type::Str], result: Box::new(Type::Nil) })),
        ("writeLine", Type::Function(FunctionType { params: vec![Type::Str], result: Box::new(Type::Nil) })),
        ("bool", Type::Function(FunctionType { params: vec![Type::Bool], result: Box::new(Type::Bool) })),
        ("list.add", Type::Macro),
        ("list.size", Type::Function(FunctionType { params: vec![Type::Any], result: Box::new(Type::Int) })),
    ]
}

pub struct Compiler<'h> {
    heap: &'h Heap,
    globals: Vec<(&'static str, Type)>,
    funcs: Vec<FuncScope>,
    chunk: Chunk,
}

pub fn compile(program: &Block, heap: &Heap) -> Result<Chunk, CompileError> {
    let mut compiler = Compiler { heap, globals: global_env(), funcs: Vec::new(), chunk: Chunk::new() };
    compiler.compile_program(program)
}

impl<'h> Compiler<'h> {
    fn compile_program(&mut self, program: &Block) -> Result<Chunk, CompileError> {
        self.funcs.push(FuncScope::new());
        self.compile_stmts(program)?;
        let top = self.funcs.pop().expect("program scope");
        self.chunk.add_function(top.code);
        Ok(std::mem::replace(&mut self.chunk, Chunk::new()))
    }

    fn cur(&mut self) -> &mut FuncScope {
        self.funcs.last_mut().expect("at least one active function scope")
    }

    fn push_block(&mut self) {
        self.cur().blocks.push(Vec::new());
    }

    fn pop_block_emit_pop(&mut self) {
        let scope = self.cur();
        let block = scope.blocks.pop().expect("matching push_block");
        let n = block.len();
        scope.next_local -= n as u32;
        if n > 0 {
            scope.code.emit_op(Op::Pop);
            scope.code.emit_u16(n as u16);
        }
    }

    fn define_local(&mut self, name: &str, ty: Type, line: usize) -> Result<u16, CompileError> {
        let scope = self.cur();
        if scope.next_local >= i16::MAX as u32 {
            return Err(CompileError::TooManyLocals { line });
        }
        let index = scope.next_local as u16;
        scope.next_local += 1;
        scope.blocks.last_mut().expect("function scope always has a block").push(LocalVar { name: name.to_string(), index, ty });
        Ok(index)
    }

    fn set_local_type(&mut self, index: u16, ty: Type) {
        let scope = self.cur();
        for block in scope.blocks.iter_mut().rev() {
            if let Some(v) = block.iter_mut().rev().find(|v| v.index == index) {
                v.ty = ty;
                return;
            }
        }
    }

    fn find_local(&self, func_idx: usize, name: &str) -> Option<Binding> {
        let scope = &self.funcs[func_idx];
        for block in scope.blocks.iter().rev() {
            if let Some(v) = block.iter().rev().find(|v| v.name == name) {
                return Some(Binding::Local(v.index, v.ty.clone()));
            }
        }
        None
    }

    fn find_existing_upvalue(&self, func_idx: usize, name: &str) -> Option<Binding> {
        let scope = &self.funcs[func_idx];
        scope.upvalues.iter().position(|u| u.name == name).map(|pos| Binding::Upvalue(pos as u16, scope.upvalues[pos].ty.clone()))
    }

    fn resolve_binding(&mut self, func_idx: usize, name: &str, line: usize) -> Result<Option<Binding>, CompileError> {
        if let Some(b) = self.find_local(func_idx, name) {
            return Ok(Some(b));
        }
        if let Some(b) = self.find_existing_upvalue(func_idx, name) {
            return Ok(Some(b));
        }
        if func_idx == 0 {
            return Ok(None);
        }
        let parent = match self.resolve_binding(func_idx - 1, name, line)? {
            Some(p) => p,
            None => return Ok(None),
        };
        let raw = parent.encode();
        let ty = parent.ty();
        let scope = &mut self.funcs[func_idx];
        if scope.upvalues.len() >= u16::MAX as usize {
            return Err(CompileError::TooManyUpvalues { line });
        }
        let new_idx = scope.upvalues.len() as u16;
        scope.upvalues.push(UpvalueDesc { name: name.to_string(), raw, ty: ty.clone() });
        Ok(Some(Binding::Upvalue(new_idx, ty)))
    }

    fn resolve(&mut self, name: &str, line: usize) -> Result<Option<Binding>, CompileError> {
        let top = self.funcs.len() - 1;
        self.resolve_binding(top, name, line)
    }

    fn global_type(&self, name: &str) -> Option<Type> {
        self.globals.iter().find(|(n, _)| *n == name).map(|(_, t)| t.clone())
    }

    fn compile_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_inner_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.push_block();
        self.compile_stmts(stmts)?;
        self.pop_block_emit_pop();
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Let { name, value, line } => self.compile_let(name, value, *line),
            Stmt::Set { name, value, line } => self.compile_set(name, value, *line),
            Stmt::ExprStat(expr) => {
                self.compile_expr(expr)?;
                self.cur().code.emit_op(Op::Ignore);
                Ok(())
            }
            Stmt::If { cond, then_block, else_block, line } => self.compile_if(cond, then_block, else_block.as_deref(), *line),
            Stmt::While { cond, body, line } => self.compile_while(cond, body, *line),
            Stmt::Return { value, line } => self.compile_return(value, *line),
        }
    }

    fn compile_let(&mut self, name: &str, value: &Expr, line: usize) -> Result<(), CompileError> {
        if let Expr::Function(lit) = value {
            let index = self.define_local(name, Type::Unknown, line)?;
            let (ftype, proto, argc, upvalues) = self.compile_function(lit, Some(name))?;
            self.emit_make_func(proto, argc, &upvalues);
            self.set_local_type(index, ftype);
        } else {
            let ty = self.compile_expr(value)?;
            self.define_local(name, ty, line)?;
        }
        self.cur().code.emit_op(Op::Let);
        Ok(())
    }

    fn compile_set(&mut self, name: &str, value: &Expr, line: usize) -> Result<(), CompileError> {
        let binding = self.resolve(name, line)?.ok_or_else(|| CompileError::UndefinedIdentifier { name: name.to_string(), line })?;
        let target_ty = binding.ty();
        let value_ty = self.compile_expr(value)?;
        if !value_ty.can_be_assigned_to(&target_ty) {
            return Err(CompileError::TypeMismatch {
                message: format!("cannot assign value of type '{}' to '{name}' of type '{}'", value_ty.desc(), target_ty.desc()),
                line,
            });
        }
        let idx = binding.encode();
        self.cur().code.emit_op(Op::SetLocal);
        self.cur().code.emit_i16(idx);
        Ok(())
    }

    fn compile_if(&mut self, cond: &Expr, then_block: &[Stmt], else_block: Option<&[Stmt]>, line: usize) -> Result<(), CompileError> {
        self.expect_bool(cond, line)?;
        self.cur().code.emit_op(Op::JumpIfNot);
        let jif_at = self.cur().code.offset();
        self.cur().code.emit_i16(0);

        self.compile_inner_block(then_block)?;

        if let Some(else_stmts) = else_block {
            self.cur().code.emit_op(Op::Jump);
            let jmp_at = self.cur().code.offset();
            self.cur().code.emit_i16(0);
            let else_start = self.cur().code.offset();
            self.patch_jump(jif_at, else_start, line)?;

            self.compile_inner_block(else_stmts)?;

            let end = self.cur().code.offset();
            self.patch_jump(jmp_at, end, line)?;
        } else {
            let end = self.cur().code.offset();
            self.patch_jump(jif_at, end, line)?;
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt], line: usize) -> Result<(), CompileError> {
        let cond_pos = self.cur().code.offset();
        self.expect_bool(cond, line)?;
        self.cur().code.emit_op(Op::JumpIfNot);
        let jif_at = self.cur().code.offset();
        self.cur().code.emit_i16(0);

        self.compile_inner_block(body)?;

        self.cur().code.emit_op(Op::Jump);
        let jmp_at = self.cur().code.offset();
        self.cur().code.emit_i16(0);
        self.patch_jump(jmp_at, cond_pos, line)?;

        let end = self.cur().code.offset();
        self.patch_jump(jif_at, end, line)?;
        Ok(())
    }

    fn expect_bool(&mut self, cond: &Expr, line: usize) -> Result<(), CompileError> {
        let ty = self.compile_expr(cond)?;
        if ty != Type::Bool {
            return Err(CompileError::TypeMismatch { message: format!("condition must be bool, found '{}'", ty.desc()), line });
        }
        Ok(())
    }

    fn patch_jump(&mut self, at: usize, target: usize, line: usize) -> Result<(), CompileError> {
        self.cur().code.patch_jump_at(at, target).map_err(|message| CompileError::JumpTooFar { message, line })
    }

    fn compile_return(&mut self, value: &Expr, line: usize) -> Result<(), CompileError> {
        let ty = self.compile_expr(value)?;
        let scope = self.cur();
        match &scope.return_type {
            None => scope.return_type = Some(ty),
            Some(expected) => {
                if !ty.can_be_assigned_to(expected) {
                    return Err(CompileError::TypeMismatch {
                        message: format!("inconsistent return type: expected '{}', found '{}'", expected.desc(), ty.desc()),
                        line,
                    });
                }
            }
        }
        self.cur().code.emit_op(Op::Return);
        Ok(())
    }

    fn emit_make_func(&mut self, proto: u16, argc: u16, upvalues: &[i16]) {
        let code = &mut self.cur().code;
        code.emit_op(Op::MakeFunc);
        code.emit_u16(proto);
        code.emit_u16(argc);
        code.emit_u16(upvalues.len() as u16);
        for &raw in upvalues {
            code.emit_i16(raw);
        }
    }

    /// Compiles a nested function literal into its own `FunctionChunk`,
    /// returning its static type, the index it was installed at in the
    /// chunk's function table, its parameter count, and the list of raw
    /// upvalue indices `MAKE_FUNC` must capture from the enclosing frame.
    fn compile_function(&mut self, lit: &FunctionLiteral, _self_name: Option<&str>) -> Result<(Type, u16, u16, Vec<i16>), CompileError> {
        if lit.params.len() > u16::MAX as usize {
            return Err(CompileError::TooManyArgs { line: lit.line });
        }
        self.funcs.push(FuncScope::new());
        let mut param_types = Vec::with_capacity(lit.params.len());
        for p in &lit.params {
            let ty = match &p.type_name {
                Some(name) => Type::from_name(name)
                    .ok_or_else(|| CompileError::Internal(format!("unknown type name '{name}'")))?,
                None => Type::Any,
            };
            param_types.push(ty.clone());
            self.define_local(&p.name, ty, lit.line)?;
        }
        self.compile_stmts(&lit.body)?;

        let mut scope = self.funcs.pop().expect("function scope");
        let result_type = scope.return_type.take().unwrap_or(Type::Nil);
        if self.chunk.functions.len() >= u16::MAX as usize {
            return Err(CompileError::TooManyFunctions { line: lit.line });
        }
        let proto = self.chunk.add_function(std::mem::replace(&mut scope.code, FunctionChunk::new()));
        let upvalues: Vec<i16> = scope.upvalues.iter().map(|u| u.raw).collect();
        let ftype = Type::Function(FunctionType { params: param_types, result: Box::new(result_type) });
        Ok((ftype, proto, lit.params.len() as u16, upvalues))
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<Type, CompileError> {
        match expr {
            Expr::Literal(lit, _line) => self.compile_literal(lit),
            Expr::Identifier(name, line) => self.compile_identifier(name, *line),
            Expr::Unary(op, operand, line) => self.compile_unary(*op, operand, *line),
            Expr::Binary(op, lhs, rhs, line) => self.compile_binary(*op, lhs, rhs, *line),
            Expr::Index(target, index, line) => self.compile_index(target, index, *line),
            Expr::Property(target, name, line) => self.compile_property(target, name, *line).map(|(ty, _)| ty),
            Expr::List(items, line) => self.compile_list(items, *line),
            Expr::Call(callee, args, line) => self.compile_call(callee, args, *line),
            Expr::Function(lit) => {
                let (ty, proto, argc, upvalues) = self.compile_function(lit, None)?;
                self.emit_make_func(proto, argc, &upvalues);
                Ok(ty)
            }
        }
    }

    fn compile_literal(&mut self, lit: &Literal) -> Result<Type, CompileError> {
        let (value, ty) = match lit {
            Literal::Nil => (somire_core::Value::NIL, Type::Nil),
            Literal::Bool(b) => (somire_core::Value::bool(*b), Type::Bool),
            Literal::Int(n) => (somire_core::Value::int(*n), Type::Int),
            Literal::Real(n) => (somire_core::Value::real(*n), Type::Real),
            Literal::Str(s) => {
                let idx = self.chunk.add_string_constant(self.heap, s).map_err(CompileError::Internal)?;
                self.cur().code.emit_op(Op::Constant);
                self.cur().code.emit_u16(idx);
                return Ok(Type::Str);
            }
        };
        let idx = self.chunk.add_constant(value).map_err(CompileError::Internal)?;
        self.cur().code.emit_op(Op::Constant);
        self.cur().code.emit_u16(idx);
        Ok(ty)
    }

    fn compile_identifier(&mut self, name: &str, line: usize) -> Result<Type, CompileError> {
        if let Some(binding) = self.resolve(name, line)? {
            let idx = binding.encode();
            self.cur().code.emit_op(Op::Local);
            self.cur().code.emit_i16(idx);
            return Ok(binding.ty());
        }
        self.compile_global(name, line)
    }

    fn compile_global(&mut self, name: &str, line: usize) -> Result<Type, CompileError> {
        match self.global_type(name) {
            Some(ty) => {
                let idx = self.chunk.add_string_constant(self.heap, name).map_err(CompileError::Internal)?;
                self.cur().code.emit_op(Op::Global);
                self.cur().code.emit_u16(idx);
                Ok(ty)
            }
            None => Err(CompileError::UndefinedIdentifier { name: name.to_string(), line }),
        }
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, line: usize) -> Result<Type, CompileError> {
        let ty = self.compile_expr(operand)?;
        match op {
            UnaryOp::Neg => {
                if !ty.is_numeric() {
                    return Err(CompileError::TypeMismatch { message: format!("unary '-' requires a numeric operand, found '{}'", ty.desc()), line });
                }
                self.cur().code.emit_op(Op::UniMinus);
                Ok(ty)
            }
            UnaryOp::Not => {
                if ty != Type::Bool {
                    return Err(CompileError::TypeMismatch { message: format!("'not' requires a bool operand, found '{}'", ty.desc()), line });
                }
                self.cur().code.emit_op(Op::Not);
                Ok(Type::Bool)
            }
        }
    }

    fn numeric_result(a: &Type, b: &Type) -> Option<Type> {
        match (a, b) {
            (Type::Int, Type::Int) => Some(Type::Int),
            (Type::Int, Type::Real) | (Type::Real, Type::Int) | (Type::Real, Type::Real) => Some(Type::Real),
            _ => None,
        }
    }

    fn compile_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, line: usize) -> Result<Type, CompileError> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lt = self.compile_expr(lhs)?;
                if lt != Type::Bool {
                    return Err(CompileError::TypeMismatch { message: format!("'{}' requires bool operands, found '{}'", op_symbol(op), lt.desc()), line });
                }
                let rt = self.compile_expr(rhs)?;
                if rt != Type::Bool {
                    return Err(CompileError::TypeMismatch { message: format!("'{}' requires bool operands, found '{}'", op_symbol(op), rt.desc()), line });
                }
                self.cur().code.emit_op(if op == BinaryOp::And { Op::BinAnd } else { Op::BinOr });
                Ok(Type::Bool)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.cur().code.emit_op(Op::BinEquals);
                if op == BinaryOp::Ne {
                    self.cur().code.emit_op(Op::Not);
                }
                Ok(Type::Bool)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let lt = self.compile_expr(lhs)?;
                let rt = self.compile_expr(rhs)?;
                if !lt.is_numeric() || !rt.is_numeric() {
                    return Err(CompileError::TypeMismatch {
                        message: format!("'{}' requires numeric operands, found '{}' and '{}'", op_symbol(op), lt.desc(), rt.desc()),
                        line,
                    });
                }
                match op {
                    BinaryOp::Lt => self.cur().code.emit_op(Op::BinLess),
                    BinaryOp::Le => self.cur().code.emit_op(Op::BinLessOrEq),
                    BinaryOp::Gt => {
                        self.cur().code.emit_op(Op::BinLessOrEq);
                        self.cur().code.emit_op(Op::Not);
                    }
                    BinaryOp::Ge => {
                        self.cur().code.emit_op(Op::BinLess);
                        self.cur().code.emit_op(Op::Not);
                    }
                    _ => unreachable!(),
                };
                Ok(Type::Bool)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Mod => {
                let lt = self.compile_expr(lhs)?;
                let rt = self.compile_expr(rhs)?;
                let result = Self::numeric_result(&lt, &rt).ok_or_else(|| CompileError::TypeMismatch {
                    message: format!("'{}' requires numeric operands, found '{}' and '{}'", op_symbol(op), lt.desc(), rt.desc()),
                    line,
                })?;
                let opcode = match op {
                    BinaryOp::Add => Op::BinPlus,
                    BinaryOp::Sub => Op::BinMinus,
                    BinaryOp::Mul => Op::BinMultiply,
                    BinaryOp::Mod => Op::BinModulo,
                    _ => unreachable!(),
                };
                self.cur().code.emit_op(opcode);
                Ok(result)
            }
            BinaryOp::Div | BinaryOp::Pow => {
                let lt = self.compile_expr(lhs)?;
                let rt = self.compile_expr(rhs)?;
                if Self::numeric_result(&lt, &rt).is_none() {
                    return Err(CompileError::TypeMismatch {
                        message: format!("'{}' requires numeric operands, found '{}' and '{}'", op_symbol(op), lt.desc(), rt.desc()),
                        line,
                    });
                }
                self.cur().code.emit_op(if op == BinaryOp::Div { Op::BinDivide } else { Op::BinPower });
                Ok(Type::Real)
            }
        }
    }

    fn compile_index(&mut self, target: &Expr, index: &Expr, line: usize) -> Result<Type, CompileError> {
        let target_ty = self.compile_expr(target)?;
        let index_ty = self.compile_expr(index)?;
        if index_ty != Type::Int {
            return Err(CompileError::TypeMismatch { message: format!("list index must be int, found '{}'", index_ty.desc()), line });
        }
        let elem_ty = match &target_ty {
            Type::List(ListType { elem: Some(t) }) => (**t).clone(),
            Type::List(ListType { elem: None }) => Type::Any,
            Type::Any => Type::Any,
            other => {
                return Err(CompileError::TypeMismatch { message: format!("cannot index into '{}'", other.desc()), line });
            }
        };
        self.cur().code.emit_op(Op::BinIndex);
        Ok(elem_ty)
    }

    fn compile_list(&mut self, items: &[Expr], line: usize) -> Result<Type, CompileError> {
        if items.len() > u16::MAX as usize {
            return Err(CompileError::TooManyArgs { line });
        }
        let mut elem_ty: Option<Type> = None;
        for item in items {
            let ty = self.compile_expr(item)?;
            elem_ty = Some(match elem_ty {
                None => ty,
                Some(prev) if prev == ty => prev,
                Some(_) => Type::Any,
            });
        }
        self.cur().code.emit_op(Op::MakeList);
        self.cur().code.emit_u16(items.len() as u16);
        Ok(match elem_ty {
            Some(t) => Type::list_of(t),
            None => Type::empty_list(),
        })
    }

    /// Folds `base.prop` into a single dotted global-name lookup when `base`
    /// is a bare identifier -- the runtime globals namespace stores
    /// `list.add`/`list.size` under those exact literal names rather than
    /// as members of a real `list` namespace object.
    fn compile_property(&mut self, target: &Expr, prop: &str, line: usize) -> Result<(Type, String), CompileError> {
        let base = match target {
            Expr::Identifier(base, _) if self.resolve(base, line)?.is_none() => base.clone(),
            _ => {
                return Err(CompileError::UndefinedIdentifier {
                    name: format!("<expr>.{prop}"),
                    line,
                })
            }
        };
        let dotted = format!("{base}.{prop}");
        let ty = self.compile_global(&dotted, line)?;
        Ok((ty, dotted))
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], line: usize) -> Result<Type, CompileError> {
        let callee_ty = if let Expr::Property(target, prop, prop_line) = callee {
            self.compile_property(target, prop, *prop_line)?.0
        } else {
            self.compile_expr(callee)?
        };

        if args.len() > u16::MAX as usize {
            return Err(CompileError::TooManyArgs { line });
        }
        let mut arg_types = Vec::with_capacity(args.len());
        for a in args {
            arg_types.push(self.compile_expr(a)?);
        }
        self.cur().code.emit_op(Op::Call);
        self.cur().code.emit_u16(args.len() as u16);

        match &callee_ty {
            Type::Macro | Type::Any | Type::Unknown => Ok(Type::Any),
            Type::Function(ft) => {
                if ft.params.len() != args.len() {
                    return Err(CompileError::ArityMismatch { expected: ft.params.len(), got: args.len(), line });
                }
                for (i, (arg_ty, param_ty)) in arg_types.iter().zip(&ft.params).enumerate() {
                    if !arg_ty.can_be_assigned_to(param_ty) {
                        return Err(CompileError::TypeMismatch {
                            message: format!("argument {} has type '{}', expected '{}'", i + 1, arg_ty.desc(), param_ty.desc()),
                            line,
                        });
                    }
                }
                Ok((*ft.result).clone())
            }
            other => Err(CompileError::TypeMismatch { message: format!("'{}' is not callable", other.desc()), line }),
        }
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "^",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile_src(src: &str) -> Result<Chunk, CompileError> {
        let heap = Heap::new();
        let block = Parser::parse_program(src).expect("parses");
        compile(&block, &heap)
    }

    #[test]
    fn compiles_arithmetic() {
        let chunk = compile_src("let x = 1 + 2 * 3\nlog(x)\n").unwrap();
        assert_eq!(chunk.functions.len(), 1);
    }

    #[test]
    fn rejects_int_plus_string() {
        let err = compile_src("let x = 1 + \"a\"\n").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_non_bool_condition() {
        let err = compile_src("if 1:\n  log(1)\n").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn recursive_function_compiles() {
        let src = "let fact = fun(n):\n  if n <= 1:\n    return 1\n  return n * fact(n - 1)\nlog(fact(5))\n";
        let chunk = compile_src(src).unwrap();
        assert_eq!(chunk.functions.len(), 2);
    }

    #[test]
    fn closure_over_outer_local_compiles() {
        let src = "let makeCounter = fun():\n  let c = 0\n  return fun():\n    c = c + 1\n    return c\nlet c1 = makeCounter()\nlog(c1())\n";
        let chunk = compile_src(src).unwrap();
        assert_eq!(chunk.functions.len(), 3);
    }

    #[test]
    fn undefined_identifier_is_an_error() {
        let err = compile_src("log(y)\n").unwrap_err();
        assert!(matches!(err, CompileError::UndefinedIdentifier { .. }));
    }

    #[test]
    fn assignment_to_undefined_is_an_error() {
        let err = compile_src("y = 1\n").unwrap_err();
        assert!(matches!(err, CompileError::UndefinedIdentifier { .. }));
    }

    #[test]
    fn list_add_folds_to_dotted_global() {
        let chunk = compile_src("let l = [1, 2]\nlist.add(l, 3)\n").unwrap();
        assert_eq!(chunk.functions.len(), 1);
    }
}
