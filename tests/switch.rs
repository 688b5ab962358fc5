use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn matching_case_runs_only_its_own_body() {
    let source = r#"
        切换（1）「
            案例 1：
                打印 "一"；
            案例 2：
                打印 "二"；
            预设：
                打印 "其他"；
        」
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "一\n");
}

#[test]
fn no_matching_case_falls_through_to_default() {
    let source = r#"
        切换（9）「
            案例 1：
                打印 "一"；
            案例 2：
                打印 "二"；
            预设：
                打印 "其他"；
        」
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "其他\n");
}

#[test]
fn no_matching_case_and_no_default_runs_nothing() {
    let source = r#"
        切换（9）「
            案例 1：
                打印 "一"；
            案例 2：
                打印 "二"；
        」
        打印 "之后"；
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "之后\n");
}
