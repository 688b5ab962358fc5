use yuyan::{InterpretResult, SharedBuffer, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = SharedBuffer::new();
    let mut vm = Vm::with_writer(buffer.clone());
    let result = vm.interpret(source);
    (result, buffer.contents())
}

#[test]
fn a_chunk_may_hold_up_to_256_constants() {
    let mut source = String::new();
    for i in 0..256 {
        source.push_str(&format!("打印 {i}；"));
    }
    let (result, _) = run(&source);
    assert_eq!(result, InterpretResult::Ok);
}

#[test]
fn exceeding_256_constants_in_one_chunk_is_a_compile_error() {
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("打印 {i}；"));
    }
    let (result, _) = run(&source);
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn exceeding_256_locals_in_one_function_is_a_compile_error() {
    let mut source = String::from("功能 太多局部（）「");
    for i in 0..300 {
        source.push_str(&format!("变量 x{i} = 0；"));
    }
    source.push_str("」太多局部（）；");
    let (result, _) = run(&source);
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn exceeding_255_call_arguments_is_a_compile_error() {
    // 真 (true) is a bare opcode, not a constant-pool entry, so this isolates
    // the argument-count limit from the constant-pool limit.
    let args = vec!["真"; 300].join("，");
    let source = format!("未定义（{args}）；");
    let (result, _) = run(&source);
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn exceeding_64_call_frames_is_a_runtime_stack_overflow() {
    let source = r#"
        功能 递归（n）「
            如果（n 等 0）「
                返回 0；
            」
            返回 递归（n - 1）；
        」
        打印 递归（200）；
    "#;
    let (result, _) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError);
}
