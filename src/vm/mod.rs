mod native;

use std::cell::RefCell;
use std::io::{self, Stdout, Write};
use std::rc::Rc;

use crate::chunk::OpCode;
use crate::compiler;
use crate::error::{InterpretResult, RuntimeError, TraceFrame};
use crate::gc::Heap;
use crate::object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjNative, ObjString, ObjUpvalue,
    Upvalue,
};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

struct CallFrame {
    closure: Rc<ObjClosure>,
    ip: usize,
    base: usize,
}

/// An in-memory sink tests can read back after `interpret` returns, so the
/// `打印` opcode's output is asserted the same way a driver would assert on
/// captured stdout.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The bytecode interpreter: a call-frame stack over a shared value stack,
/// the globals table, and the heap (objects + string pool). `W` is where
/// the `打印` opcode writes; it defaults to real stdout and is swapped for
/// a `SharedBuffer` in tests.
pub struct Vm<W: Write = Stdout> {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table<Value>,
    heap: RefCell<Heap>,
    open_upvalues: Vec<Rc<ObjUpvalue>>,
    out: W,
}

impl Vm<Stdout> {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for Vm<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Vm<W> {
    pub fn with_writer(out: W) -> Self {
        native::install_clock_epoch();
        let mut vm = Self {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            heap: RefCell::new(Heap::new()),
            open_upvalues: Vec::new(),
            out,
        };
        vm.define_native("clock", 0, native::clock);
        vm
    }

    fn define_native(&mut self, name: &'static str, arity: u8, function: crate::object::NativeFn) {
        let key = self.heap.borrow_mut().intern(name);
        let native = Rc::new(ObjNative {
            name,
            arity,
            function,
            marked: std::cell::Cell::new(false),
        });
        self.globals.set(key, Value::Obj(Obj::Native(native)));
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let compiled = compiler::compile(source, &self.heap);
        let function = match compiled {
            Ok(function) => function,
            Err(errors) => {
                for error in errors {
                    log::error!("{error}");
                }
                return InterpretResult::CompileError;
            }
        };

        let closure = Rc::new(ObjClosure::new(function));
        self.stack.push(Value::Obj(Obj::Closure(Rc::clone(&closure))));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: 0,
        });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(error) => {
                log::error!("{error}");
                self.stack.clear();
                self.frames.clear();
                self.open_upvalues.clear();
                InterpretResult::RuntimeError
            }
        }
    }

    // ---- stack helpers --------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        let len = self.stack.len();
        &self.stack[len - 1 - distance]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let byte = frame.closure.function.chunk.borrow().code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        frame.closure.function.chunk.borrow().constants[index].clone()
    }

    fn read_string(&mut self) -> Rc<ObjString> {
        match self.read_constant() {
            Value::Obj(Obj::String(s)) => s,
            _ => unreachable!("constant pool name slot must be a string"),
        }
    }

    fn runtime_error(&mut self, message: String) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let line = frame
                .closure
                .function
                .chunk
                .borrow()
                .line_at(frame.ip.saturating_sub(1));
            trace.push(TraceFrame {
                line,
                function_name: frame.closure.function.display_name(),
            });
        }
        RuntimeError { message, trace }
    }

    // ---- main loop --------------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.heap.borrow().should_collect() {
                self.collect_garbage();
            }

            let instruction = self.read_byte();
            let Some(op) = OpCode::from_u8(instruction) else {
                return Err(self.runtime_error("未知的指令".to_string()));
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().base;
                    self.push(self.stack[base + slot].clone());
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().base;
                    self.stack[base + slot] = self.peek(0).clone();
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            return Err(self.runtime_error(format!("未定义的变量 '{name}'")));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0).clone();
                    if self.globals.set(Rc::clone(&name), value) {
                        self.globals.delete(&name);
                        return Err(self.runtime_error(format!("未定义的变量 '{name}'")));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = Rc::clone(&self.frames.last().unwrap().closure.upvalues[slot]);
                    let value = match &*upvalue.location.borrow() {
                        Upvalue::Open(index) => self.stack[*index].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = Rc::clone(&self.frames.last().unwrap().closure.upvalues[slot]);
                    let value = self.peek(0).clone();
                    let mut location = upvalue.location.borrow_mut();
                    match &mut *location {
                        Upvalue::Open(index) => self.stack[*index] = value,
                        Upvalue::Closed(slot) => *slot = value,
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let instance = match self.peek(0) {
                        Value::Obj(Obj::Instance(i)) => Rc::clone(i),
                        _ => return Err(self.runtime_error("只有实例拥有属性".to_string())),
                    };
                    if let Some(value) = instance.fields.borrow().get(&name) {
                        let value = value.clone();
                        self.pop();
                        self.push(value);
                    } else {
                        self.bind_method(&instance.class, &name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let instance = match self.peek(1) {
                        Value::Obj(Obj::Instance(i)) => Rc::clone(i),
                        _ => return Err(self.runtime_error("只有实例拥有属性".to_string())),
                    };
                    let value = self.peek(0).clone();
                    instance.fields.borrow_mut().set(name, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = match self.pop() {
                        Value::Obj(Obj::Class(c)) => c,
                        _ => unreachable!("超 must resolve to a class"),
                    };
                    self.bind_method(&superclass, &name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                OpCode::Modulo => self.binary_number_op(|a, b| Value::Number(a % b))?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let value = self.peek(0).clone();
                    match value.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => return Err(self.runtime_error("操作数必须是数字".to_string())),
                    }
                }
                OpCode::Print => {
                    let value = self.pop();
                    let _ = writeln!(self.out, "{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize).clone();
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let method = self.read_string();
                    let argc = self.read_byte();
                    self.invoke(&method, argc)?;
                }
                OpCode::SuperInvoke => {
                    let method = self.read_string();
                    let argc = self.read_byte();
                    let superclass = match self.pop() {
                        Value::Obj(Obj::Class(c)) => c,
                        _ => unreachable!("超 must resolve to a class"),
                    };
                    self.invoke_from_class(&superclass, &method, argc)?;
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(Obj::Function(f)) => f,
                        _ => unreachable!("CLOSURE operand must be a function constant"),
                    };
                    let upvalue_count = function.upvalue_count;
                    let mut closure = ObjClosure::new(Rc::clone(&function));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.frames.last().unwrap().base;
                            self.capture_upvalue(base + index)
                        } else {
                            Rc::clone(&self.frames.last().unwrap().closure.upvalues[index])
                        };
                        closure.upvalues.push(upvalue);
                    }
                    let closure = self.heap.borrow_mut().alloc_closure(closure);
                    self.push(Value::Obj(Obj::Closure(closure)));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.heap.borrow_mut().alloc_class(ObjClass::new(name));
                    self.push(Value::Obj(Obj::Class(class)));
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Obj(Obj::Class(c)) => Rc::clone(c),
                        _ => return Err(self.runtime_error("超类必须是一个类".to_string())),
                    };
                    let subclass = match self.peek(0) {
                        Value::Obj(Obj::Class(c)) => Rc::clone(c),
                        _ => unreachable!(),
                    };
                    for (name, method) in superclass.borrow().methods.borrow().iter() {
                        subclass
                            .borrow()
                            .methods
                            .borrow_mut()
                            .set(Rc::clone(name), Rc::clone(method));
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    self.define_method(&name);
                }
            }
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0).clone();
        let a = self.peek(1).clone();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(x + y));
            }
            (Value::Obj(Obj::String(x)), Value::Obj(Obj::String(y))) => {
                let mut joined = x.chars.clone();
                joined.push_str(&y.chars);
                let interned = self.heap.borrow_mut().intern(&joined);
                self.pop();
                self.pop();
                self.push(Value::Obj(Obj::String(interned)));
            }
            _ => return Err(self.runtime_error("操作数必须都是数字或都是字符串".to_string())),
        }
        Ok(())
    }

    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let (a, b) = match (self.peek(1).as_number(), self.peek(0).as_number()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(self.runtime_error("操作数必须是数字".to_string())),
        };
        self.pop();
        self.pop();
        self.push(op(a, b));
        Ok(())
    }

    // ---- calling ------------------------------------------------------

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, argc),
            Value::Obj(Obj::Native(native)) => {
                if argc != native.arity {
                    return Err(self.runtime_error(format!(
                        "期望 {} 个参数，但得到 {argc} 个",
                        native.arity
                    )));
                }
                let start = self.stack.len() - argc as usize;
                let args: Vec<Value> = self.stack[start..].to_vec();
                let result = (native.function)(&args)
                    .map_err(|message| self.runtime_error(message))?;
                self.stack.truncate(start - 1);
                self.push(result);
                Ok(())
            }
            Value::Obj(Obj::Class(class)) => {
                let instance = self
                    .heap
                    .borrow_mut()
                    .alloc_instance(ObjInstance::new(Rc::clone(&class)));
                let receiver_slot = self.stack.len() - argc as usize - 1;
                self.stack[receiver_slot] = Value::Obj(Obj::Instance(Rc::clone(&instance)));

                let initializer = {
                    let init_name = self.heap.borrow_mut().intern(compiler::INITIALIZER_NAME);
                    class.borrow().methods.borrow().get(&init_name).cloned()
                };
                match initializer {
                    Some(initializer) => self.call_closure(initializer, argc),
                    None => {
                        if argc != 0 {
                            return Err(self.runtime_error(format!(
                                "期望 0 个参数，但得到 {argc} 个"
                            )));
                        }
                        Ok(())
                    }
                }
            }
            Value::Obj(Obj::BoundMethod(bound)) => {
                let receiver_slot = self.stack.len() - argc as usize - 1;
                self.stack[receiver_slot] = bound.receiver.clone();
                self.call_closure(Rc::clone(&bound.method), argc)
            }
            _ => Err(self.runtime_error("只能调用函数和类".to_string())),
        }
    }

    fn call_closure(&mut self, closure: Rc<ObjClosure>, argc: u8) -> Result<(), RuntimeError> {
        if argc != closure.function.arity {
            return Err(self.runtime_error(format!(
                "期望 {} 个参数，但得到 {argc} 个",
                closure.function.arity
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("堆栈溢出".to_string()));
        }
        let base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
        });
        Ok(())
    }

    fn invoke(&mut self, name: &Rc<ObjString>, argc: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc as usize).clone();
        let instance = match receiver {
            Value::Obj(Obj::Instance(i)) => i,
            _ => return Err(self.runtime_error("只有实例拥有方法".to_string())),
        };
        if let Some(value) = instance.fields.borrow().get(name) {
            let value = value.clone();
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = value.clone();
            return self.call_value(value, argc);
        }
        self.invoke_from_class(&instance.class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: &Rc<RefCell<ObjClass>>,
        name: &Rc<ObjString>,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = class.borrow().methods.borrow().get(name).cloned();
        match method {
            Some(method) => self.call_closure(method, argc),
            None => Err(self.runtime_error(format!("未定义的属性 '{name}'"))),
        }
    }

    fn bind_method(
        &mut self,
        class: &Rc<RefCell<ObjClass>>,
        name: &Rc<ObjString>,
    ) -> Result<(), RuntimeError> {
        let method = class.borrow().methods.borrow().get(name).cloned();
        match method {
            Some(method) => {
                let receiver = self.pop();
                let bound = ObjBoundMethod {
                    receiver,
                    method,
                    marked: std::cell::Cell::new(false),
                };
                let size = std::mem::size_of::<ObjBoundMethod>();
                let rc = Rc::new(bound);
                self.heap
                    .borrow_mut()
                    .track_other(Obj::BoundMethod(Rc::clone(&rc)), size);
                self.push(Value::Obj(Obj::BoundMethod(rc)));
                Ok(())
            }
            None => Err(self.runtime_error(format!("未定义的属性 '{name}'"))),
        }
    }

    fn define_method(&mut self, name: &Rc<ObjString>) {
        let method = match self.pop() {
            Value::Obj(Obj::Closure(c)) => c,
            _ => unreachable!("方法体必须编译为闭包"),
        };
        let class = match self.peek(0) {
            Value::Obj(Obj::Class(c)) => Rc::clone(c),
            _ => unreachable!("方法必须绑定到类上"),
        };
        class.borrow().methods.borrow_mut().set(Rc::clone(name), method);
    }

    // ---- upvalues -------------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> Rc<ObjUpvalue> {
        if let Some(existing) = self.open_upvalues.iter().find(|up| {
            matches!(&*up.location.borrow(), Upvalue::Open(index) if *index == stack_index)
        }) {
            return Rc::clone(existing);
        }
        let upvalue = Rc::new(ObjUpvalue::new(stack_index));
        self.open_upvalues.push(Rc::clone(&upvalue));
        upvalue
    }

    fn close_upvalues(&mut self, from: usize) {
        let mut remaining = Vec::new();
        for upvalue in self.open_upvalues.drain(..) {
            let index = match &*upvalue.location.borrow() {
                Upvalue::Open(index) => Some(*index),
                Upvalue::Closed(_) => None,
            };
            match index {
                Some(index) if index >= from => {
                    let value = self.stack[index].clone();
                    *upvalue.location.borrow_mut() = Upvalue::Closed(value);
                }
                _ => remaining.push(upvalue),
            }
        }
        self.open_upvalues = remaining;
    }

    // ---- garbage collection ----------------------------------------------

    fn collect_garbage(&mut self) {
        let mut roots: Vec<Obj> = Vec::new();
        for value in &self.stack {
            if let Value::Obj(o) = value {
                roots.push(o.clone());
            }
        }
        for frame in &self.frames {
            roots.push(Obj::Closure(Rc::clone(&frame.closure)));
        }
        for upvalue in &self.open_upvalues {
            roots.push(Obj::Upvalue(Rc::clone(upvalue)));
        }
        for (key, value) in self.globals.iter() {
            roots.push(Obj::String(Rc::clone(key)));
            if let Value::Obj(o) = value {
                roots.push(o.clone());
            }
        }
        self.heap.borrow_mut().collect(roots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (InterpretResult, String) {
        let buffer = SharedBuffer::new();
        let mut vm = Vm::with_writer(buffer.clone());
        let result = vm.interpret(source);
        (result, buffer.contents())
    }

    #[test]
    fn arithmetic_and_print() {
        let (result, out) = run("变量 a = 1 + 2；打印 a；");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(out, "3\n");
    }

    #[test]
    fn function_returning_string() {
        let (result, out) = run("功能 f（）「返回 \"你好\"；」打印 f（）；");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(out, "你好\n");
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let (result, _) = run("未定义（）；");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn counter_closure_shares_upvalue() {
        let source = r#"
            功能 制造计数器（）「
                变量 数 = 0；
                功能 计数（）「
                    数 = 数 + 1；
                    返回 数；
                」
                返回 计数；
            」
            变量 计数器 = 制造计数器（）；
            打印 计数器（）；
            打印 计数器（）；
            打印 计数器（）；
        "#;
        let (result, out) = run(source);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(out, "1\n2\n3\n");
    }

    #[test]
    fn class_inheritance_and_super() {
        let source = r#"
            类 A 『
                问候（）「
                    打印 "A"；
                」
            』
            类 B < A 『
                问候（）「
                    超。问候（）；
                    打印 "B"；
                」
            』
            B（）。问候（）；
        "#;
        let (result, out) = run(source);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(out, "A\nB\n");
    }
}
