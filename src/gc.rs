use std::cell::RefCell;
use std::rc::Rc;

use crate::object::{hash_str, Obj, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjString};
use crate::table::Table;
use crate::value::Value;

const INITIAL_THRESHOLD: usize = 1024 * 1024;
const GROWTH_FACTOR: usize = 2;

/// Owns every heap object and the string-intern pool, and runs the
/// mark-and-sweep collector over them.
///
/// Every object also lives behind an `Rc` held by whatever references it
/// (stack slots, globals, closures...); the `Heap`'s own `Vec<Obj>` registry
/// is what makes collection a deliberate, traceable decision instead of
/// incidental refcount-reaches-zero cleanup. Sweeping removes the registry's
/// strong reference to an unmarked object; if nothing else in the running
/// program still holds it, that drop is what actually frees it.
pub struct Heap {
    objects: Vec<Obj>,
    strings: Table<()>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_THRESHOLD,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    fn track(&mut self, obj: Obj, size: usize) {
        self.bytes_allocated += size;
        self.objects.push(obj);
    }

    /// Interns `chars`, returning the existing `ObjString` if one with equal
    /// content already exists.
    pub fn intern(&mut self, chars: &str) -> Rc<ObjString> {
        let hash = hash_str(chars);
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return existing;
        }
        let obj_string = Rc::new(ObjString::new(chars.to_string()));
        self.strings.set(Rc::clone(&obj_string), ());
        let size = std::mem::size_of::<ObjString>() + chars.len();
        self.track(Obj::String(Rc::clone(&obj_string)), size);
        obj_string
    }

    pub fn alloc_function(&mut self, function: ObjFunction) -> Rc<ObjFunction> {
        let rc = Rc::new(function);
        self.track(
            Obj::Function(Rc::clone(&rc)),
            std::mem::size_of::<ObjFunction>(),
        );
        rc
    }

    pub fn alloc_closure(&mut self, closure: ObjClosure) -> Rc<ObjClosure> {
        let rc = Rc::new(closure);
        self.track(
            Obj::Closure(Rc::clone(&rc)),
            std::mem::size_of::<ObjClosure>(),
        );
        rc
    }

    pub fn alloc_class(&mut self, class: ObjClass) -> Rc<RefCell<ObjClass>> {
        let rc = Rc::new(RefCell::new(class));
        self.track(
            Obj::Class(Rc::clone(&rc)),
            std::mem::size_of::<ObjClass>(),
        );
        rc
    }

    pub fn alloc_instance(&mut self, instance: ObjInstance) -> Rc<ObjInstance> {
        let rc = Rc::new(instance);
        self.track(
            Obj::Instance(Rc::clone(&rc)),
            std::mem::size_of::<ObjInstance>(),
        );
        rc
    }

    pub fn track_other(&mut self, obj: Obj, size: usize) {
        self.track(obj, size);
    }

    /// Runs one full mark-and-sweep cycle. `roots` must enumerate every
    /// `Obj` directly reachable from the VM (stack, frames, open upvalues,
    /// globals, the in-progress compiler chain).
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Obj>) {
        let mut worklist: Vec<Obj> = Vec::new();
        for root in roots {
            if !root.is_marked() {
                root.set_marked(true);
                worklist.push(root);
            }
        }
        while let Some(obj) = worklist.pop() {
            let mut children = Vec::new();
            obj.blacken(&mut children);
            for child in children {
                if !child.is_marked() {
                    child.set_marked(true);
                    worklist.push(child);
                }
            }
        }

        self.strings.retain_keys(|s| s.marked.get());

        let before = self.objects.len();
        self.objects.retain(|obj| obj.is_marked());
        let freed = before - self.objects.len();
        log::trace!("gc: swept {freed} objects, {} remain", self.objects.len());

        for obj in &self.objects {
            obj.set_marked(false);
        }

        self.bytes_allocated = self.objects.len() * 64;
        self.next_gc = self.bytes_allocated.max(INITIAL_THRESHOLD) * GROWTH_FACTOR;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn obj_of(value: &Value) -> Option<Obj> {
    match value {
        Value::Obj(o) => Some(o.clone()),
        _ => None,
    }
}
