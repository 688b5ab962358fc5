use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn counter_closure_shares_upvalue_across_calls() {
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
fn two_sibling_closures_share_one_upvalue() {
    let source = r#"
        功能 制造对（）「
            变量 共享 = 0；
            功能 增加（）「
                共享 = 共享 + 1；
            」
            功能 读取（）「
                返回 共享；
            」
            增加（）；
            打印 读取（）；
            增加（）；
            打印 读取（）；
        」
        制造对（）；
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "1\n2\n");
}
