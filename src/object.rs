use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// FNV-1a, matching the hash the lexer/table use to key interned strings.
pub fn hash_str(s: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct ObjString {
    pub chars: String,
    pub hash: u32,
    pub marked: Cell<bool>,
}

impl ObjString {
    pub fn new(chars: String) -> Self {
        let hash = hash_str(&chars);
        Self {
            chars,
            hash,
            marked: Cell::new(false),
        }
    }
}

impl fmt::Display for ObjString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chars)
    }
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: RefCell<Chunk>,
    pub name: Option<Rc<ObjString>>,
    pub marked: Cell<bool>,
}

impl ObjFunction {
    pub fn new(name: Option<Rc<ObjString>>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: RefCell::new(Chunk::new()),
            name,
            marked: Cell::new(false),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.chars.clone(),
            None => "脚本".to_string(),
        }
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
    pub marked: Cell<bool>,
}

/// An upvalue is either still pointing into the owning frame's slice of the
/// value stack (`Open`) or has had its value copied out onto the heap once
/// the frame it referenced returned (`Closed`).
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub location: RefCell<Upvalue>,
    pub marked: Cell<bool>,
}

impl ObjUpvalue {
    pub fn new(stack_index: usize) -> Self {
        Self {
            location: RefCell::new(Upvalue::Open(stack_index)),
            marked: Cell::new(false),
        }
    }
}

pub struct ObjClosure {
    pub function: Rc<ObjFunction>,
    pub upvalues: Vec<Rc<ObjUpvalue>>,
    pub marked: Cell<bool>,
}

impl ObjClosure {
    pub fn new(function: Rc<ObjFunction>) -> Self {
        let upvalue_count = function.upvalue_count;
        Self {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
            marked: Cell::new(false),
        }
    }
}

pub struct ObjClass {
    pub name: Rc<ObjString>,
    pub methods: RefCell<Table<Rc<ObjClosure>>>,
    pub marked: Cell<bool>,
}

impl ObjClass {
    pub fn new(name: Rc<ObjString>) -> Self {
        Self {
            name,
            methods: RefCell::new(Table::new()),
            marked: Cell::new(false),
        }
    }
}

pub struct ObjInstance {
    pub class: Rc<RefCell<ObjClass>>,
    pub fields: RefCell<Table<Value>>,
    pub marked: Cell<bool>,
}

impl ObjInstance {
    pub fn new(class: Rc<RefCell<ObjClass>>) -> Self {
        Self {
            class,
            fields: RefCell::new(Table::new()),
            marked: Cell::new(false),
        }
    }
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: Rc<ObjClosure>,
    pub marked: Cell<bool>,
}

/// A heap reference. Cheap to clone: every variant wraps an `Rc`.
///
/// Memory safety is carried by `Rc`; reachability is still decided by an
/// explicit mark-and-sweep pass over the `Heap`'s object list (see
/// `crate::gc`), which is what keeps the collector's behavior testable
/// instead of silently degrading to plain refcounting.
#[derive(Clone)]
pub enum Obj {
    String(Rc<ObjString>),
    Function(Rc<ObjFunction>),
    Native(Rc<ObjNative>),
    Closure(Rc<ObjClosure>),
    Upvalue(Rc<ObjUpvalue>),
    Class(Rc<RefCell<ObjClass>>),
    Instance(Rc<ObjInstance>),
    BoundMethod(Rc<ObjBoundMethod>),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native function",
            Obj::Closure(_) => "function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "function",
        }
    }

    pub fn as_string(&self) -> Option<&Rc<ObjString>> {
        match self {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Rc<ObjClosure>> {
        match self {
            Obj::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_marked(&self) -> bool {
        match self {
            Obj::String(s) => s.marked.get(),
            Obj::Function(f) => f.marked.get(),
            Obj::Native(n) => n.marked.get(),
            Obj::Closure(c) => c.marked.get(),
            Obj::Upvalue(u) => u.marked.get(),
            Obj::Class(c) => c.borrow().marked.get(),
            Obj::Instance(i) => i.marked.get(),
            Obj::BoundMethod(b) => b.marked.get(),
        }
    }

    pub fn set_marked(&self, value: bool) {
        match self {
            Obj::String(s) => s.marked.set(value),
            Obj::Function(f) => f.marked.set(value),
            Obj::Native(n) => n.marked.set(value),
            Obj::Closure(c) => c.marked.set(value),
            Obj::Upvalue(u) => u.marked.set(value),
            Obj::Class(c) => c.borrow().marked.set(value),
            Obj::Instance(i) => i.marked.set(value),
            Obj::BoundMethod(b) => b.marked.set(value),
        }
    }

    /// Pushes every `Obj` directly reachable from `self` onto `worklist`, for
    /// the GC's mark phase. Leaf objects (strings, natives) have nothing to add.
    pub fn blacken(&self, worklist: &mut Vec<Obj>) {
        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = &f.name {
                    worklist.push(Obj::String(Rc::clone(name)));
                }
                for constant in &f.chunk.borrow().constants {
                    if let Value::Obj(o) = constant {
                        worklist.push(o.clone());
                    }
                }
            }
            Obj::Closure(c) => {
                worklist.push(Obj::Function(Rc::clone(&c.function)));
                for upvalue in &c.upvalues {
                    worklist.push(Obj::Upvalue(Rc::clone(upvalue)));
                }
            }
            Obj::Upvalue(u) => {
                if let Upvalue::Closed(value) = &*u.location.borrow() {
                    if let Value::Obj(o) = value {
                        worklist.push(o.clone());
                    }
                }
            }
            Obj::Class(c) => {
                let class = c.borrow();
                worklist.push(Obj::String(Rc::clone(&class.name)));
                for (key, method) in class.methods.borrow().iter() {
                    worklist.push(Obj::String(Rc::clone(key)));
                    worklist.push(Obj::Closure(Rc::clone(method)));
                }
            }
            Obj::Instance(i) => {
                worklist.push(Obj::Class(Rc::clone(&i.class)));
                for (key, value) in i.fields.borrow().iter() {
                    worklist.push(Obj::String(Rc::clone(key)));
                    if let Value::Obj(o) = value {
                        worklist.push(o.clone());
                    }
                }
            }
            Obj::BoundMethod(b) => {
                if let Value::Obj(o) = &b.receiver {
                    worklist.push(o.clone());
                }
                worklist.push(Obj::Closure(Rc::clone(&b.method)));
            }
        }
    }

    /// Objects compare by identity except strings, whose identity *is*
    /// content because every string is interned (see `crate::gc::Heap::intern`).
    pub fn identity_eq(&self, other: &Obj) -> bool {
        match (self, other) {
            (Obj::String(a), Obj::String(b)) => Rc::ptr_eq(a, b),
            (Obj::Function(a), Obj::Function(b)) => Rc::ptr_eq(a, b),
            (Obj::Native(a), Obj::Native(b)) => Rc::ptr_eq(a, b),
            (Obj::Closure(a), Obj::Closure(b)) => Rc::ptr_eq(a, b),
            (Obj::Upvalue(a), Obj::Upvalue(b)) => Rc::ptr_eq(a, b),
            (Obj::Class(a), Obj::Class(b)) => Rc::ptr_eq(a, b),
            (Obj::Instance(a), Obj::Instance(b)) => Rc::ptr_eq(a, b),
            (Obj::BoundMethod(a), Obj::BoundMethod(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::String(s) => write!(f, "{s}"),
            Obj::Function(fun) => write!(f, "<功能 {}>", fun.display_name()),
            Obj::Native(n) => write!(f, "<原生功能 {}>", n.name),
            Obj::Closure(c) => write!(f, "<功能 {}>", c.function.display_name()),
            Obj::Upvalue(_) => write!(f, "<upvalue>"),
            Obj::Class(c) => write!(f, "{}", c.borrow().name),
            Obj::Instance(i) => write!(f, "<{} 实例>", i.class.borrow().name),
            Obj::BoundMethod(b) => write!(f, "<功能 {}>", b.method.function.display_name()),
        }
    }
}
