use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn for_loop_with_continue_skips_the_matching_iteration() {
    let source = "对于（变量 i = 0；i 小 3；i++）「如果（i 等 1）继续；打印 i；」";
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "0\n2\n");
}

#[test]
fn while_loop_with_break_stops_the_loop_early() {
    let source = r#"
        变量 i = 0；
        而（真）「
            如果（i 等 3）打断；
            打印 i；
            i = i + 1；
        」
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn compound_assignment_operators_mutate_in_place() {
    let source = r#"
        变量 n = 10；
        n += 5；
        打印 n；
        n -= 3；
        打印 n；
        n--；
        打印 n；
    "#;
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "15\n12\n11\n");
}
