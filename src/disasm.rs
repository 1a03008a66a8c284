//! Bytecode pretty-printer, enabled only when `CORVID_TRACE` is set in the
//! environment. Never touched by the interpreter itself — `main.rs` is the
//! only caller.

use crate::chunk::{Chunk, OpCode};

pub fn disassemble(chunk: &Chunk, name: &str) {
  eprintln!("== {name} ==");
  let mut offset = 0;
  while offset < chunk.code.len() {
    offset = disassemble_instruction(chunk, offset);
  }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
  eprint!("{offset:04} ");
  if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
    eprint!("   | ");
  } else {
    eprint!("{:4} ", chunk.line_at(offset));
  }

  let byte = chunk.code[offset];
  let Some(op) = OpCode::from_u8(byte) else {
    eprintln!("unknown opcode {byte}");
    return offset + 1;
  };

  match op {
    OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset),
    OpCode::Nil => simple_instruction("OP_NIL", offset),
    OpCode::True => simple_instruction("OP_TRUE", offset),
    OpCode::False => simple_instruction("OP_FALSE", offset),
    OpCode::Pop => simple_instruction("OP_POP", offset),
    OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
    OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
    OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
    OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
    OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset),
    OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset),
    OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
    OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset),
    OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset),
    OpCode::Equal => simple_instruction("OP_EQUAL", offset),
    OpCode::Greater => simple_instruction("OP_GREATER", offset),
    OpCode::Less => simple_instruction("OP_LESS", offset),
    OpCode::Add => simple_instruction("OP_ADD", offset),
    OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
    OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
    OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
    OpCode::Not => simple_instruction("OP_NOT", offset),
    OpCode::Negate => simple_instruction("OP_NEGATE", offset),
    OpCode::Print => simple_instruction("OP_PRINT", offset),
    OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
    OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
    OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
    OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
    OpCode::Closure => closure_instruction(chunk, offset),
    OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
    OpCode::Class => constant_instruction("OP_CLASS", chunk, offset),
    OpCode::Method => constant_instruction("OP_METHOD", chunk, offset),
    OpCode::Return => simple_instruction("OP_RETURN", offset),
  }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
  eprintln!("{name}");
  offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
  let slot = chunk.code[offset + 1];
  eprintln!("{name:<16} {slot:4}");
  offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
  let hi = chunk.code[offset + 1] as u16;
  let lo = chunk.code[offset + 2] as u16;
  let jump = ((hi << 8) | lo) as i32;
  let target = offset as i32 + 3 + sign * jump;
  eprintln!("{name:<16} {offset:4} -> {target}");
  offset + 3
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
  let idx = chunk.code[offset + 1];
  eprintln!(
    "{name:<16} {idx:4} '{}'",
    chunk.constants[idx as usize]
  );
  offset + 2
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
  let mut offset = offset + 1;
  let idx = chunk.code[offset];
  offset += 1;
  eprintln!("OP_CLOSURE        {idx:4} '{}'", chunk.constants[idx as usize]);

  let upvalue_count = match &chunk.constants[idx as usize] {
    crate::value::Value::Obj(o) => o.as_function().upvalue_count,
    _ => 0,
  };
  for _ in 0..upvalue_count {
    let is_local = chunk.code[offset];
    let index = chunk.code[offset + 1];
    offset += 2;
    eprintln!(
      "{offset:04}      |                     {} {index}",
      if is_local != 0 { "local" } else { "upvalue" }
    );
  }
  offset
}
