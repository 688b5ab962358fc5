use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

fn exit_code_for(result: InterpretResult) -> i32 {
    match result {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 65,
        InterpretResult::RuntimeError => 70,
    }
}

#[test]
fn calling_an_undefined_global_is_a_runtime_error_exiting_70() {
    let (result, _) = run("未定义（）；");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(exit_code_for(result), 70);
}

#[test]
fn reading_an_undefined_global_is_a_runtime_error() {
    let (result, _) = run("打印 未定义变量；");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn a_runtime_error_leaves_the_vm_usable_for_the_next_program() {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());

    let first = vm.interpret("未定义（）；");
    assert_eq!(first, InterpretResult::RuntimeError);

    let second = vm.interpret("打印 1 + 1；");
    assert_eq!(second, InterpretResult::Ok);
    assert_eq!(buffer.contents(), "2\n");
}

#[test]
fn a_syntax_error_is_reported_as_a_compile_error() {
    let (result, _) = run("变量 ；");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(exit_code_for(result), 65);
}
