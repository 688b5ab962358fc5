use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn overridden_method_calls_its_superclass_via_super() {
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

#[test]
fn initializer_runs_on_construction_and_fields_are_set() {
    let source = r#"
        类 点 『
            初始化（横，纵）「
                这。横 = 横；
                这。纵 = 纵；
            」
            求和（）「
                返回 这。横 + 这。纵；
            」
        』
        变量 p = 点（3，4）；
        打印 p。求和（）；
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "7\n");
}

#[test]
fn subclass_inherits_methods_it_does_not_override() {
    let source = r#"
        类 动物 『
            叫（）「
                打印 "……"；
            」
        』
        类 猫 < 动物 『』
        猫（）。叫（）；
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "……\n");
}
