mod rules;

pub use rules::{get_rule, ParseRule, Precedence};

use std::cell::RefCell;
use std::rc::Rc;

use crate::chunk::{Chunk, OpCode};
use crate::error::CompileError;
use crate::gc::Heap;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::object::{ObjFunction, ObjString};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_ARGS: usize = 255;

/// The reserved method name that makes a method double as a constructor:
/// calling the class invokes it and the VM implicitly returns the new
/// instance regardless of what the body returns.
pub const INITIALIZER_NAME: &str = "初始化";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct LocalVar {
    name: String,
    depth: i32,
    is_captured: bool,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct LoopCtx {
    continue_target: usize,
    break_jumps: Vec<usize>,
}

struct FuncState {
    chunk: Chunk,
    arity: u8,
    name: Option<String>,
    fn_type: FunctionType,
    locals: Vec<LocalVar>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loops: Vec<LoopCtx>,
}

impl FuncState {
    fn new(fn_type: FunctionType, name: Option<String>) -> Self {
        // Slot 0 is reserved: `this` for methods/initializers, otherwise unnamed.
        let first_local_name = if matches!(fn_type, FunctionType::Method | FunctionType::Initializer) {
            "这".to_string()
        } else {
            String::new()
        };
        Self {
            chunk: Chunk::new(),
            arity: 0,
            name,
            fn_type,
            locals: vec![LocalVar {
                name: first_local_name,
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

/// Single-pass Pratt compiler: no AST is ever built, bytecode is emitted
/// directly as tokens are consumed. Function bodies push a new `FuncState`
/// and pop it back to the enclosing one when the body closes, mirroring the
/// recursive enclosing-compiler chain of the textbook algorithm.
pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    previous: Token<'a>,
    current: Token<'a>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'a RefCell<Heap>,
    funcs: Vec<FuncState>,
    classes: Vec<ClassState>,
}

pub fn compile(source: &str, heap: &RefCell<Heap>) -> Result<Rc<ObjFunction>, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.run();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(compiler.finish())
    }
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str, heap: &'a RefCell<Heap>) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.scan_token();
        let previous = current.clone();
        Self {
            lexer,
            previous,
            current,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            funcs: vec![FuncState::new(FunctionType::Script, None)],
            classes: Vec::new(),
        }
    }

    fn run(&mut self) {
        while !self.check(&TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::Eof, "expected end of expression".to_string());
    }

    fn finish(mut self) -> Rc<ObjFunction> {
        self.emit_return();
        let state = self.funcs.pop().expect("script function frame");
        let name = state.name.map(|n| self.heap.borrow_mut().intern(&n));
        let function = ObjFunction {
            arity: state.arity,
            upvalue_count: state.upvalues.len(),
            chunk: RefCell::new(state.chunk),
            name,
            marked: std::cell::Cell::new(false),
        };
        self.heap.borrow_mut().alloc_function(function)
    }

    // ---- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.lexer.scan_token();
            if let TokenKind::Error(message) = &self.current.kind {
                let message = message.clone();
                self.error_at_current(message);
            } else {
                break;
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: String) {
        if std::mem::discriminant(&self.current.kind) == std::mem::discriminant(&kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(&kind) {
            return false;
        }
        self.advance();
        true
    }

    // ---- error reporting ------------------------------------------------

    fn error_at_current(&mut self, message: String) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error(&mut self, message: String) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token<'a>, message: String) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let at = if matches!(token.kind, TokenKind::Eof) {
            String::new()
        } else {
            token.lexeme.to_string()
        };
        self.errors.push(CompileError {
            line: token.line,
            at,
            message,
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(&TokenKind::Eof) {
            if matches!(self.previous.kind, TokenKind::Semicolon) {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- bytecode emission ----------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.funcs.last_mut().unwrap().chunk
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.current_chunk().write_u8(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.current_chunk().write_op(op, line);
    }

    fn emit_ops(&mut self, a: OpCode, b: u8) {
        self.emit_op(a);
        self.emit_byte(b);
    }

    fn emit_return(&mut self) {
        if self.funcs.last().unwrap().fn_type == FunctionType::Initializer {
            self.emit_ops(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(index) => index,
            None => {
                self.error("一个代码块中的常量过多".to_string());
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_ops(OpCode::Constant, index);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.heap.borrow_mut().intern(name);
        self.make_constant(Value::Obj(crate::object::Obj::String(interned)))
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("跳转的距离过远".to_string());
        }
        let chunk = self.current_chunk();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("循环体过大".to_string());
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // ---- scopes & locals --------------------------------------------------

    fn begin_scope(&mut self) {
        self.funcs.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let state = self.funcs.last_mut().unwrap();
        state.scope_depth -= 1;
        let depth = state.scope_depth;
        while let Some(local) = state.locals.last() {
            if local.depth <= depth {
                break;
            }
            if state.locals.last().unwrap().is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.funcs.last_mut().unwrap().locals.pop();
        }
    }

    fn add_local(&mut self, name: String) {
        let state = self.funcs.last_mut().unwrap();
        if state.locals.len() >= MAX_LOCALS {
            self.error("一个函数中局部变量过多".to_string());
            return;
        }
        state.locals.push(LocalVar {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self, name: &str) {
        let state = self.funcs.last();
        if state.unwrap().scope_depth == 0 {
            return;
        }
        let depth = self.funcs.last().unwrap().scope_depth;
        for local in self.funcs.last().unwrap().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error("此作用域中已存在同名变量".to_string());
            }
        }
        self.add_local(name.to_string());
    }

    fn mark_initialized(&mut self) {
        let state = self.funcs.last_mut().unwrap();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        state.locals.last_mut().unwrap().depth = depth;
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message.to_string());
        let name = self.previous.lexeme.to_string();
        self.declare_variable(&name);
        if self.funcs.last().unwrap().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.funcs.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_ops(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&self, func_index: usize, name: &str) -> Option<u8> {
        let state = &self.funcs[func_index];
        for (i, local) in state.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return None;
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, func_index: usize, name: &str) -> Option<u8> {
        if func_index == 0 {
            return None;
        }
        let enclosing = func_index - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.funcs[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(func_index, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(func_index, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, func_index: usize, index: u8, is_local: bool) -> u8 {
        let state = &mut self.funcs[func_index];
        for (i, up) in state.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if state.upvalues.len() >= MAX_LOCALS {
            self.error("一个函数中捕获的变量过多".to_string());
            return 0;
        }
        state.upvalues.push(UpvalueDesc { index, is_local });
        (state.upvalues.len() - 1) as u8
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.expression();
                if count == MAX_ARGS {
                    self.error("参数过多".to_string());
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "期望 ')' 以结束参数列表".to_string());
        count as u8
    }

    // ---- declarations & statements --------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Switch) {
            self.switch_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "期望 '」' 以结束代码块".to_string());
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("期望变量名");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "期望 '；' 以结束变量声明".to_string());
        self.define_variable(global);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "期望 '；' 以结束表达式语句".to_string());
        self.emit_op(OpCode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "期望 '；' 以结束打印语句".to_string());
        self.emit_op(OpCode::Print);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "期望 '（' 在 如果 之后".to_string());
        self.expression();
        self.consume(TokenKind::RightParen, "期望 '）' 以结束条件".to_string());

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.funcs.last_mut().unwrap().loops.push(LoopCtx {
            continue_target: loop_start,
            break_jumps: Vec::new(),
        });

        self.consume(TokenKind::LeftParen, "期望 '（' 在 而 之后".to_string());
        self.expression();
        self.consume(TokenKind::RightParen, "期望 '）' 以结束条件".to_string());

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
        self.end_loop();
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "期望 '（' 在 对于 之后".to_string());

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "期望 '；' 以结束循环条件".to_string());
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.check(&TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "期望 '）' 以结束 对于 子句".to_string());

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        } else {
            self.consume(TokenKind::RightParen, "期望 '）' 以结束 对于 子句".to_string());
        }

        self.funcs.last_mut().unwrap().loops.push(LoopCtx {
            continue_target: loop_start,
            break_jumps: Vec::new(),
        });

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_loop();
        self.end_scope();
    }

    fn end_loop(&mut self) {
        let ctx = self.funcs.last_mut().unwrap().loops.pop().unwrap();
        for jump in ctx.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn break_statement(&mut self) {
        if self.funcs.last().unwrap().loops.is_empty() {
            self.error("'打断' 只能在循环中使用".to_string());
            return;
        }
        self.consume(TokenKind::Semicolon, "期望 '；' 以结束 打断".to_string());
        let jump = self.emit_jump(OpCode::Jump);
        self.funcs
            .last_mut()
            .unwrap()
            .loops
            .last_mut()
            .unwrap()
            .break_jumps
            .push(jump);
    }

    fn continue_statement(&mut self) {
        if self.funcs.last().unwrap().loops.is_empty() {
            self.error("'继续' 只能在循环中使用".to_string());
            return;
        }
        self.consume(TokenKind::Semicolon, "期望 '；' 以结束 继续".to_string());
        let target = self.funcs.last().unwrap().loops.last().unwrap().continue_target;
        self.emit_loop(target);
    }

    /// Since the instruction set has no stack-duplication opcode, the
    /// discriminant is evaluated once and kept in an anonymous local slot;
    /// each `案例` compares against that slot instead of a duplicated stack
    /// top. `end_scope` at the end pops the slot like any other local.
    fn switch_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "期望 '（' 在 切换 之后".to_string());
        self.begin_scope();
        self.expression();
        self.add_local(String::new());
        self.mark_initialized();
        let slot = (self.funcs.last().unwrap().locals.len() - 1) as u8;
        self.consume(TokenKind::RightParen, "期望 '）' 以结束切换表达式".to_string());
        self.consume(TokenKind::LeftBrace, "期望 '「' 以开始 切换 代码块".to_string());

        let mut end_jumps: Vec<usize> = Vec::new();
        let mut prev_case_skip: Option<usize> = None;

        while self.match_token(TokenKind::Case) {
            if let Some(jump) = prev_case_skip.take() {
                self.patch_jump(jump);
                self.emit_op(OpCode::Pop);
            }
            self.emit_ops(OpCode::GetLocal, slot);
            self.expression();
            self.consume(TokenKind::Colon, "期望 '：' 在 案例 值 之后".to_string());
            self.emit_op(OpCode::Equal);
            let skip = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop);

            while !self.check(&TokenKind::Case)
                && !self.check(&TokenKind::Default)
                && !self.check(&TokenKind::RightBrace)
            {
                self.statement();
            }
            end_jumps.push(self.emit_jump(OpCode::Jump));
            prev_case_skip = Some(skip);
        }

        if let Some(jump) = prev_case_skip.take() {
            self.patch_jump(jump);
            self.emit_op(OpCode::Pop);
        }

        if self.match_token(TokenKind::Default) {
            self.consume(TokenKind::Colon, "期望 '：' 在 预设 之后".to_string());
            while !self.check(&TokenKind::RightBrace) {
                self.statement();
            }
        }

        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.consume(TokenKind::RightBrace, "期望 '」' 以结束 切换 代码块".to_string());
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.funcs.last().unwrap().fn_type == FunctionType::Script {
            self.error("只能在函数内使用 '返回'".to_string());
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.funcs.last().unwrap().fn_type == FunctionType::Initializer {
                self.error("不能在构造函数中返回值".to_string());
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "期望 '；' 以结束返回语句".to_string());
            self.emit_op(OpCode::Return);
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("期望函数名");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, fn_type: FunctionType) {
        let name = self.previous.lexeme.to_string();
        self.funcs.push(FuncState::new(fn_type, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "期望 '（' 在函数名之后".to_string());
        if !self.check(&TokenKind::RightParen) {
            loop {
                let arity = {
                    let state = self.funcs.last_mut().unwrap();
                    state.arity += 1;
                    state.arity
                };
                if arity as usize > MAX_ARGS {
                    self.error("参数过多".to_string());
                }
                let constant = self.parse_variable("期望参数名");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "期望 '）' 以结束参数列表".to_string());
        self.consume(TokenKind::LeftBrace, "期望 '「' 以开始函数体".to_string());
        self.block();

        self.emit_return();
        let state = self.funcs.pop().unwrap();
        let upvalues: Vec<UpvalueDesc> = state.upvalues;
        let name = state.name.clone().map(|n| self.heap.borrow_mut().intern(&n));
        let function = ObjFunction {
            arity: state.arity,
            upvalue_count: upvalues.len(),
            chunk: RefCell::new(state.chunk),
            name,
            marked: std::cell::Cell::new(false),
        };
        let rc = self.heap.borrow_mut().alloc_function(function);
        let constant = self.make_constant(Value::Obj(crate::object::Obj::Function(rc)));
        self.emit_ops(OpCode::Closure, constant);
        for up in &upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "期望类名".to_string());
        let class_name = self.previous.lexeme.to_string();
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable(&class_name);

        self.emit_ops(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "期望超类名".to_string());
            let super_name = self.previous.lexeme.to_string();
            if super_name == class_name {
                self.error("类不能继承自身".to_string());
            }
            self.variable_named(&super_name, false);

            self.begin_scope();
            self.add_local("超".to_string());
            self.mark_initialized();

            self.variable_named(&class_name, false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.variable_named(&class_name, false);
        self.consume(TokenKind::LeftBrace, "期望 '『' 以开始类体".to_string());
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "期望 '』' 以结束类体".to_string());
        self.emit_op(OpCode::Pop);

        let class = self.classes.pop().unwrap();
        if class.has_superclass {
            self.end_scope();
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "期望方法名".to_string());
        let name = self.previous.lexeme.to_string();
        let constant = self.identifier_constant(&name);
        let fn_type = if name == INITIALIZER_NAME {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(fn_type);
        self.emit_ops(OpCode::Method, constant);
    }

    // ---- expressions --------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix_rule = get_rule(&self.previous.kind).prefix;
        let Some(prefix_rule) = prefix_rule else {
            self.error("期望表达式".to_string());
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, can_assign);

        while precedence <= get_rule(&self.current.kind).precedence {
            self.advance();
            let infix_rule = get_rule(&self.previous.kind).infix.unwrap();
            infix_rule(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("无效的赋值目标".to_string());
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let raw = self.previous.lexeme;
        let content = &raw[1..raw.len() - 1];
        let interned = self.heap.borrow_mut().intern(content);
        self.emit_constant(Value::Obj(crate::object::Obj::String(interned)));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "期望 '）' 以结束表达式".to_string());
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind.clone();
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind.clone();
        let rule = get_rule(&op_kind);
        self.parse_precedence(rule.precedence.next());
        match op_kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_ops(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "期望属性名".to_string());
        let name = self.previous.lexeme.to_string();
        let constant = self.identifier_constant(&name);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_ops(OpCode::SetProperty, constant);
        } else if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_ops(OpCode::Invoke, constant);
            self.emit_byte(argc);
        } else {
            self.emit_ops(OpCode::GetProperty, constant);
        }
    }

    fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("'这' 只能在类体内使用".to_string());
            return;
        }
        self.variable_named("这", false);
    }

    fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("'超' 只能在类体内使用".to_string());
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("此类没有超类".to_string());
        }
        self.consume(TokenKind::Dot, "期望 '。' 在 超 之后".to_string());
        self.consume(TokenKind::Identifier, "期望超类方法名".to_string());
        let name = self.previous.lexeme.to_string();
        let constant = self.identifier_constant(&name);

        self.variable_named("这", false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.variable_named("超", false);
            self.emit_ops(OpCode::SuperInvoke, constant);
            self.emit_byte(argc);
        } else {
            self.variable_named("超", false);
            self.emit_ops(OpCode::GetSuper, constant);
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.to_string();
        self.variable_named(&name, can_assign);
    }

    fn variable_named(&mut self, name: &str, can_assign: bool) {
        let func_index = self.funcs.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(func_index, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(func_index, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_ops(set_op, arg);
        } else if can_assign && self.match_token(TokenKind::PlusEqual) {
            self.emit_ops(get_op, arg);
            self.expression();
            self.emit_op(OpCode::Add);
            self.emit_ops(set_op, arg);
        } else if can_assign && self.match_token(TokenKind::MinusEqual) {
            self.emit_ops(get_op, arg);
            self.expression();
            self.emit_op(OpCode::Subtract);
            self.emit_ops(set_op, arg);
        } else if can_assign && self.match_token(TokenKind::PlusPlus) {
            self.emit_ops(get_op, arg);
            self.emit_constant(Value::Number(1.0));
            self.emit_op(OpCode::Add);
            self.emit_ops(set_op, arg);
        } else if can_assign && self.match_token(TokenKind::MinusMinus) {
            self.emit_ops(get_op, arg);
            self.emit_constant(Value::Number(1.0));
            self.emit_op(OpCode::Subtract);
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_source(source: &str) -> Result<Rc<ObjFunction>, Vec<CompileError>> {
        let heap = RefCell::new(Heap::new());
        compile(source, &heap)
    }

    fn errors(source: &str) -> Vec<CompileError> {
        compile_source(source).expect_err("expected a compile error")
    }

    #[test]
    fn a_well_formed_program_compiles() {
        assert!(compile_source("变量 a = 1 + 2；打印 a；").is_ok());
    }

    #[test]
    fn duplicate_local_in_the_same_scope_is_an_error() {
        let errors = errors("功能 f（）「变量 a = 1；变量 a = 2；」");
        assert!(errors.iter().any(|e| e.message.contains("已存在同名变量")));
    }

    #[test]
    fn shadowing_in_a_nested_scope_is_allowed() {
        let result = compile_source("功能 f（）「变量 a = 1；「变量 a = 2；」」");
        assert!(result.is_ok());
    }

    #[test]
    fn more_than_256_locals_in_one_function_is_an_error() {
        let mut source = String::from("功能 f（）「");
        for i in 0..300 {
            source.push_str(&format!("变量 x{i} = 0；"));
        }
        source.push_str("」");
        let errors = errors(&source);
        assert!(errors.iter().any(|e| e.message.contains("局部变量过多")));
    }

    #[test]
    fn return_at_top_level_is_an_error() {
        let errors = errors("返回 1；");
        assert!(errors.iter().any(|e| e.message.contains("只能在函数内使用")));
    }

    #[test]
    fn this_outside_a_class_is_an_error() {
        let errors = errors("打印 这；");
        assert!(errors.iter().any(|e| e.message.contains("只能在类体内使用")));
    }

    #[test]
    fn super_without_a_superclass_is_an_error() {
        let errors = errors("类 A 『 问候（）「 超。问候（）； 」 』");
        assert!(errors.iter().any(|e| e.message.contains("没有超类")));
    }

    #[test]
    fn a_class_cannot_inherit_from_itself() {
        let errors = errors("类 A < A 『』");
        assert!(errors.iter().any(|e| e.message.contains("不能继承自身")));
    }

    #[test]
    fn switch_statement_compiles_to_a_chain_of_equality_checks() {
        let function = compile_source(
            r#"
                切换（1）「
                    案例 1：
                        打印 "一"；
                    预设：
                        打印 "其他"；
                」
            "#,
        )
        .expect("switch statement should compile");
        let code = &function.chunk.borrow().code;
        assert!(code.contains(&(OpCode::Equal as u8)));
        assert!(code.contains(&(OpCode::JumpIfFalse as u8)));
        assert!(code.contains(&(OpCode::Jump as u8)));
    }
}
