use std::cell::RefCell;
use std::rc::Rc;

use yuyan::gc::Heap;
use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn interning_equal_content_twice_yields_the_same_object() {
    let heap = RefCell::new(Heap::new());
    let a = heap.borrow_mut().intern("你好");
    let b = heap.borrow_mut().intern("你好");
    assert!(Rc::ptr_eq(&a, &b));
}

#[test]
fn interning_different_content_yields_different_objects() {
    let heap = RefCell::new(Heap::new());
    let a = heap.borrow_mut().intern("你好");
    let b = heap.borrow_mut().intern("再见");
    assert!(!Rc::ptr_eq(&a, &b));
}

#[test]
fn two_independently_built_equal_string_literals_compare_equal() {
    let source = r#"
        变量 a = "你好" + ""；
        变量 b = "你" + "好"；
        打印 a 等 b；
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "真\n");
}
