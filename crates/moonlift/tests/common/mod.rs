//! Prototype fixtures and a minimal `luac` 5.4 chunk writer.

#![allow(dead_code)]

use moonlift::bytecode::constant::Constant;
use moonlift::bytecode::proto::{LocalVar, UpvalDesc};
use moonlift::bytecode::{Backend, Instruction, Lua54, OpCode, Prototype};

pub fn abc(op: OpCode, a: u8, b: u8, c: u8) -> Instruction {
    Instruction::abc(op, a, b, c, false)
}

pub fn abck(op: OpCode, a: u8, b: u8, c: u8) -> Instruction {
    Instruction::abc(op, a, b, c, true)
}

pub fn jmp(offset: i32) -> Instruction {
    Instruction::sj(OpCode::Jmp, offset)
}

pub fn ret0() -> Instruction {
    abc(OpCode::Return0, 0, 1, 1)
}

pub fn string(s: &str) -> Constant {
    Constant::String(s.as_bytes().to_vec())
}

pub fn local(name: &str, start_pc: u32, end_pc: u32) -> LocalVar {
    LocalVar {
        name: name.into(),
        start_pc,
        end_pc,
    }
}

/// A main-style function with `_ENV` as its only upvalue.
pub fn proto(code: &[Instruction], constants: Vec<Constant>) -> Prototype {
    Prototype {
        source: Some("=test".into()),
        code: code.iter().map(|insn| Lua54.encode(insn)).collect(),
        constants,
        max_stack_size: 8,
        upvalues: vec![UpvalDesc {
            name: Some("_ENV".into()),
            in_stack: true,
            index: 0,
            kind: 0,
        }],
        ..Prototype::default()
    }
}

/// Serialize `main` the way `luac` 5.4 does.
pub fn dump(main: &Prototype) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"\x1bLua");
    out.push(0x54);
    out.push(0);
    out.extend_from_slice(b"\x19\x93\r\n\x1a\n");
    out.extend_from_slice(&[4, 8, 8]);
    out.extend_from_slice(&0x5678i64.to_le_bytes());
    out.extend_from_slice(&370.5f64.to_le_bytes());
    out.push(main.upvalues.len() as u8);
    dump_proto(&mut out, main);
    out
}

fn varint(out: &mut Vec<u8>, mut n: usize) {
    let mut groups = vec![(n & 0x7F) as u8 | 0x80];
    n >>= 7;
    while n != 0 {
        groups.push((n & 0x7F) as u8);
        n >>= 7;
    }
    out.extend(groups.into_iter().rev());
}

fn bytes(out: &mut Vec<u8>, s: Option<&[u8]>) {
    match s {
        None => varint(out, 0),
        Some(s) => {
            varint(out, s.len() + 1);
            out.extend_from_slice(s);
        }
    }
}

fn dump_proto(out: &mut Vec<u8>, p: &Prototype) {
    bytes(out, p.source.as_deref().map(str::as_bytes));
    varint(out, p.line_defined as usize);
    varint(out, p.last_line_defined as usize);
    out.extend_from_slice(&[p.num_params, p.is_vararg as u8, p.max_stack_size]);

    varint(out, p.code.len());
    for word in &p.code {
        out.extend_from_slice(&word.to_le_bytes());
    }

    varint(out, p.constants.len());
    for constant in &p.constants {
        match constant {
            Constant::Nil => out.push(0x00),
            Constant::Boolean(false) => out.push(0x01),
            Constant::Boolean(true) => out.push(0x11),
            Constant::Integer(i) => {
                out.push(0x03);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Constant::Float(f) => {
                out.push(0x13);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Constant::String(s) => {
                out.push(0x04);
                bytes(out, Some(s));
            }
        }
    }

    varint(out, p.upvalues.len());
    for upvalue in &p.upvalues {
        out.extend_from_slice(&[upvalue.in_stack as u8, upvalue.index, upvalue.kind]);
    }

    varint(out, p.protos.len());
    for child in &p.protos {
        dump_proto(out, child);
    }

    varint(out, 0); // lineinfo
    varint(out, 0); // abslineinfo
    varint(out, p.local_vars.len());
    for var in &p.local_vars {
        bytes(out, Some(var.name.as_bytes()));
        varint(out, var.start_pc as usize);
        varint(out, var.end_pc as usize);
    }
    varint(out, p.upvalues.len());
    for upvalue in &p.upvalues {
        bytes(out, upvalue.name.as_deref().map(str::as_bytes));
    }
}
