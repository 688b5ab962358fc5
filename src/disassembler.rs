//! Renders a `Chunk`'s bytecode to human-readable mnemonics. Used by the
//! driver's `--disassemble` flag and by tests that want to eyeball what the
//! compiler actually emitted without reading raw bytes.

use crate::chunk::{Chunk, OpCode};

/// Disassembles every instruction in `chunk`, one line per instruction,
/// prefixed by a `name` header.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

/// Disassembles a single instruction at `offset`, appends it to `out`, and
/// returns the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    out.push_str(&format!("{offset:04} "));
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{:4} ", chunk.line_at(offset)));
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_u8(byte) else {
        out.push_str(&format!("未知指令 {byte}\n"));
        return offset + 1;
    };

    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset, out),
        OpCode::Nil => simple_instruction("OP_NIL", offset, out),
        OpCode::True => simple_instruction("OP_TRUE", offset, out),
        OpCode::False => simple_instruction("OP_FALSE", offset, out),
        OpCode::Pop => simple_instruction("OP_POP", offset, out),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset, out),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset, out),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset, out),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset, out),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset, out),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset, out),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset, out),
        OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset, out),
        OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset, out),
        OpCode::GetSuper => constant_instruction("OP_GET_SUPER", chunk, offset, out),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset, out),
        OpCode::Greater => simple_instruction("OP_GREATER", offset, out),
        OpCode::Less => simple_instruction("OP_LESS", offset, out),
        OpCode::Add => simple_instruction("OP_ADD", offset, out),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset, out),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset, out),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset, out),
        OpCode::Modulo => simple_instruction("OP_MODULO", offset, out),
        OpCode::Not => simple_instruction("OP_NOT", offset, out),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset, out),
        OpCode::Print => simple_instruction("OP_PRINT", offset, out),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset, out),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset, out),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset, out),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset, out),
        OpCode::Invoke => invoke_instruction("OP_INVOKE", chunk, offset, out),
        OpCode::SuperInvoke => invoke_instruction("OP_SUPER_INVOKE", chunk, offset, out),
        OpCode::Closure => closure_instruction(chunk, offset, out),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset, out),
        OpCode::Return => simple_instruction("OP_RETURN", offset, out),
        OpCode::Class => constant_instruction("OP_CLASS", chunk, offset, out),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset, out),
        OpCode::Method => constant_instruction("OP_METHOD", chunk, offset, out),
    }
}

fn simple_instruction(name: &str, offset: usize, out: &mut String) -> usize {
    out.push_str(name);
    out.push('\n');
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code[offset + 1];
    out.push_str(&format!("{name:<16} {slot:4}\n"));
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = (hi << 8) | lo;
    let target = offset as i32 + 3 + sign * jump as i32;
    out.push_str(&format!("{name:<16} {offset:4} -> {target}\n"));
    offset + 3
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code[offset + 1] as usize;
    out.push_str(&format!(
        "{name:<16} {index:4} '{}'\n",
        chunk.constants[index]
    ));
    offset + 2
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let argc = chunk.code[offset + 2];
    out.push_str(&format!(
        "{name:<16} ({argc} 个参数) {index:4} '{}'\n",
        chunk.constants[index]
    ));
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let mut offset = offset + 1;
    let index = chunk.code[offset] as usize;
    offset += 1;
    out.push_str(&format!(
        "{:<16} {index:4} '{}'\n",
        "OP_CLOSURE", chunk.constants[index]
    ));

    let upvalue_count = match &chunk.constants[index] {
        crate::value::Value::Obj(crate::object::Obj::Function(f)) => f.upvalue_count,
        _ => 0,
    };
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset];
        let upvalue_index = chunk.code[offset + 1];
        let kind = if is_local != 0 { "局部" } else { "上值" };
        out.push_str(&format!(
            "{offset:04}      |                     {kind} {upvalue_index}\n"
        ));
        offset += 2;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn disassembles_a_constant_and_return() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(1.0)).unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write_u8(index, 1);
        chunk.write_op(OpCode::Return, 1);

        let output = disassemble_chunk(&chunk, "test");
        assert!(output.contains("OP_CONSTANT"));
        assert!(output.contains("OP_RETURN"));
    }
}
