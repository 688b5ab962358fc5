use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn prints_an_arithmetic_result() {
    let (result, out) = run("变量 a = 1 + 2；打印 a；");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "3\n");
}

#[test]
fn function_returns_a_string() {
    let (result, out) = run("功能 f（）「返回 \"你好\"；」打印 f（）；");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "你好\n");
}
