//! Linear listing of a prototype tree, one line per instruction.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::backend::Backend;
use crate::instruction::Instruction;
use crate::opcode::{OpCode, OpMode};
use crate::proto::Prototype;

/// Render `proto` and all nested prototypes as an annotated listing.
pub fn disassemble(proto: &Prototype, backend: &dyn Backend) -> String {
    let mut out = String::new();
    write_proto(&mut out, proto, backend, 0);
    out
}

fn write_proto(out: &mut String, proto: &Prototype, backend: &dyn Backend, level: usize) {
    let pad = "  ".repeat(level);
    let _ = writeln!(
        out,
        "{pad}; Function: {} (lines {}-{})",
        proto.source.as_deref().unwrap_or("?"),
        proto.line_defined,
        proto.last_line_defined
    );
    let _ = writeln!(
        out,
        "{pad}; NumParams: {}, IsVararg: {}, MaxStackSize: {}",
        proto.num_params, proto.is_vararg as u8, proto.max_stack_size
    );

    let _ = writeln!(out, "{pad}; Upvalues ({}):", proto.upvalues.len());
    for (i, upvalue) in proto.upvalues.iter().enumerate() {
        let _ = writeln!(
            out,
            "{pad}  [{i}] {} {} {} {}",
            upvalue.name.as_deref().unwrap_or("(no name)"),
            upvalue.in_stack as u8,
            upvalue.index,
            upvalue.kind
        );
    }

    let _ = writeln!(out, "{pad}; Constants ({}):", proto.constants.len());
    for (i, constant) in proto.constants.iter().enumerate() {
        let _ = writeln!(out, "{pad}  [{i}] {constant}");
    }

    let _ = writeln!(out, "{pad}; Code ({}):", proto.code.len());
    write_code(out, proto, backend, &pad);

    let _ = writeln!(out, "{pad}; Protos ({}):", proto.protos.len());
    for child in &proto.protos {
        write_proto(out, child, backend, level + 1);
    }
}

fn write_code(out: &mut String, proto: &Prototype, backend: &dyn Backend, pad: &str) {
    let code: Vec<Instruction> = proto.code.iter().map(|&raw| backend.decode(raw)).collect();
    let targets: BTreeSet<usize> = code
        .iter()
        .enumerate()
        .filter_map(|(pc, insn)| insn.jump_target(pc))
        .filter(|&t| t >= 0 && (t as usize) < code.len())
        .map(|t| t as usize)
        .collect();

    let scopes = proto.scope_tree();
    for (pc, insn) in code.iter().enumerate() {
        if targets.contains(&pc) {
            let _ = writeln!(out, "{pad}L_{}:", pc + 1);
        }
        let _ = write!(out, "{pad}[{:03}] ", pc + 1);

        let Some(info) = backend.op_info(insn.op) else {
            let _ = writeln!(out, "UNKNOWN({})", insn.op);
            continue;
        };
        let _ = write!(out, "{:<12}", info.name);
        match info.mode {
            OpMode::IABC => {
                let _ = write!(out, "{} {} {}", insn.a, insn.b, insn.c);
                if info.has_k && insn.k {
                    out.push_str(" (k)");
                }
            }
            OpMode::IABx | OpMode::IAsBx => {
                let _ = write!(out, "{} {}", insn.a, insn.bx);
            }
            OpMode::IAx | OpMode::IsJ => {
                let _ = write!(out, "{}", insn.bx);
            }
        }

        let mut notes: Vec<String> = Vec::new();
        if insn.is(OpCode::LoadK) {
            if let Some(k) = proto.constants.get(insn.bx as usize) {
                notes.push(k.to_string());
            }
        }
        if !matches!(info.mode, OpMode::IAx | OpMode::IsJ) {
            if let Some(name) = scopes.lookup(insn.a, pc) {
                notes.push(format!("R[{}]:{name}", insn.a));
            }
        }
        let upvalue = match insn.opcode() {
            Some(OpCode::GetUpval | OpCode::SetUpval | OpCode::GetTabUp) => Some(insn.b),
            Some(OpCode::SetTabUp) => Some(insn.a),
            _ => None,
        };
        if let Some(idx) = upvalue {
            if let Some(name) = proto.upvalue_name(idx as usize) {
                notes.push(format!("U[{idx}]:{name}"));
            }
        }
        match insn.opcode() {
            Some(OpCode::AddI) => notes.push(format!("val:{}", insn.sc())),
            Some(OpCode::EqI | OpCode::LtI | OpCode::LeI | OpCode::GtI | OpCode::GeI) => {
                notes.push(format!("val:{}", insn.sb()))
            }
            _ => {}
        }
        if let Some(target) = insn.jump_target(pc) {
            notes.push(format!("to L_{}", target + 1));
        }

        if !notes.is_empty() {
            let _ = write!(out, " ; {}", notes.join(" "));
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Lua54;
    use crate::constant::Constant;

    fn proto(code: &[Instruction]) -> Prototype {
        let backend = Lua54;
        Prototype {
            code: code.iter().map(|insn| backend.encode(insn)).collect(),
            max_stack_size: 4,
            ..Prototype::default()
        }
    }

    #[test]
    fn test_listing_marks_jump_targets() {
        let p = proto(&[
            Instruction::sj(OpCode::Jmp, 1),
            Instruction::abc(OpCode::LoadNil, 0, 0, 0, false),
            Instruction::abc(OpCode::Return0, 0, 1, 1, false),
        ]);
        let text = disassemble(&p, &Lua54);
        assert!(text.contains("; Code (3):"));
        assert!(text.contains("[001] JMP         1 ; to L_3"));
        assert!(text.contains("L_3:\n[003] RETURN0"));
    }

    #[test]
    fn test_listing_annotates_constants_and_k() {
        let mut p = proto(&[
            Instruction::abx(OpCode::LoadK, 0, 0),
            Instruction::abc(OpCode::EqK, 0, 0, 0, true),
        ]);
        p.constants.push(Constant::String(b"hi".to_vec()));
        let text = disassemble(&p, &Lua54);
        assert!(text.contains("[001] LOADK       0 0 ; \"hi\""));
        assert!(text.contains("[002] EQK         0 0 0 (k)"));
    }

    #[test]
    fn test_listing_reports_unknown_opcodes() {
        let p = Prototype {
            code: vec![0x7F],
            ..Prototype::default()
        };
        assert!(disassemble(&p, &Lua54).contains("[001] UNKNOWN(127)"));
    }
}
