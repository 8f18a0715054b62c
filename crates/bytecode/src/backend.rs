use crate::instruction::{Instruction, OFFSET_SBX, OFFSET_SJ};
use crate::opcode::{OpCode, OpMode, NUM_OPCODES};

/// Per-opcode metadata reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    pub mode: OpMode,
    /// Whether the `k` bit is a physical field of this opcode's layout.
    pub has_k: bool,
}

/// Translates between raw instruction words and [`Instruction`] records.
///
/// One implementation per instruction-set revision. The decompiler only
/// ever sees decoded records, so swapping the backend does not touch it.
pub trait Backend {
    fn name(&self) -> &'static str;
    fn op_count(&self) -> usize;
    fn op_info(&self, op: u8) -> Option<OpInfo>;
    fn decode(&self, raw: u32) -> Instruction;
    fn encode(&self, insn: &Instruction) -> u32;
}

const SIZE_OP: u32 = 7;
const POS_A: u32 = SIZE_OP;
const POS_K: u32 = POS_A + 8;
const POS_B: u32 = POS_K + 1;
const POS_C: u32 = POS_B + 8;
const POS_BX: u32 = POS_K;

const MASK_OP: u32 = (1 << SIZE_OP) - 1;
const MASK_8: u32 = 0xFF;
const MASK_BX: u32 = (1 << 17) - 1;
const MASK_AX: u32 = (1 << 25) - 1;

/// The Lua 5.4 instruction layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lua54;

impl Backend for Lua54 {
    fn name(&self) -> &'static str {
        "Lua 5.4"
    }

    fn op_count(&self) -> usize {
        NUM_OPCODES
    }

    fn op_info(&self, op: u8) -> Option<OpInfo> {
        let op = OpCode::from_byte(op)?;
        let mode = op.mode();
        Some(OpInfo {
            name: op.name(),
            mode,
            has_k: mode == OpMode::IABC,
        })
    }

    fn decode(&self, raw: u32) -> Instruction {
        let op = (raw & MASK_OP) as u8;
        let a = ((raw >> POS_A) & MASK_8) as u8;
        // Unknown opcodes keep their raw ABC fields so they can be reported.
        let mode = OpCode::from_byte(op).map_or(OpMode::IABC, OpCode::mode);
        let mut insn = Instruction { op, a, ..Instruction::default() };
        match mode {
            OpMode::IABC => {
                insn.b = ((raw >> POS_B) & MASK_8) as u8;
                insn.c = ((raw >> POS_C) & MASK_8) as u8;
                insn.k = (raw >> POS_K) & 1 != 0;
            }
            OpMode::IABx => insn.bx = ((raw >> POS_BX) & MASK_BX) as i32,
            OpMode::IAsBx => insn.bx = ((raw >> POS_BX) & MASK_BX) as i32 - OFFSET_SBX,
            OpMode::IAx => {
                insn.a = 0;
                insn.bx = ((raw >> POS_A) & MASK_AX) as i32;
            }
            OpMode::IsJ => {
                insn.a = 0;
                insn.bx = ((raw >> POS_A) & MASK_AX) as i32 - OFFSET_SJ;
            }
        }
        insn
    }

    fn encode(&self, insn: &Instruction) -> u32 {
        let mode = OpCode::from_byte(insn.op).map_or(OpMode::IABC, OpCode::mode);
        let mut raw = insn.op as u32 & MASK_OP;
        match mode {
            OpMode::IABC => {
                raw |= (insn.a as u32) << POS_A;
                raw |= (insn.k as u32) << POS_K;
                raw |= (insn.b as u32) << POS_B;
                raw |= (insn.c as u32) << POS_C;
            }
            OpMode::IABx => {
                raw |= (insn.a as u32) << POS_A;
                raw |= (insn.bx as u32 & MASK_BX) << POS_BX;
            }
            OpMode::IAsBx => {
                raw |= (insn.a as u32) << POS_A;
                raw |= ((insn.bx + OFFSET_SBX) as u32 & MASK_BX) << POS_BX;
            }
            OpMode::IAx => raw |= (insn.bx as u32 & MASK_AX) << POS_A,
            OpMode::IsJ => raw |= ((insn.bx + OFFSET_SJ) as u32 & MASK_AX) << POS_A,
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_words() {
        let backend = Lua54;
        // luac 5.4: `RETURN0` with no operands is 0x00000047 (op 71)
        let ret0 = backend.decode(0x0000_0047);
        assert_eq!(ret0.opcode(), Some(OpCode::Return0));

        // LOADI 0 5 => sBx = 5 => raw Bx = 65540
        let raw = OpCode::LoadI as u32 | (65540 << POS_BX);
        let loadi = backend.decode(raw);
        assert_eq!(loadi.opcode(), Some(OpCode::LoadI));
        assert_eq!(loadi.a, 0);
        assert_eq!(loadi.bx, 5);
    }

    #[test]
    fn test_signed_jump_offsets() {
        let backend = Lua54;
        for offset in [-100, -1, 0, 1, 4096] {
            let insn = Instruction::sj(OpCode::Jmp, offset);
            assert_eq!(backend.decode(backend.encode(&insn)).bx, offset);
        }
    }

    #[test]
    fn test_abc_fields_and_k_bit() {
        let backend = Lua54;
        let insn = Instruction::abc(OpCode::EqK, 3, 200, 0, true);
        let decoded = backend.decode(backend.encode(&insn));
        assert_eq!(decoded, insn);
        assert!(backend.op_info(OpCode::EqK as u8).unwrap().has_k);
        assert!(!backend.op_info(OpCode::Jmp as u8).unwrap().has_k);
    }

    #[test]
    fn test_unknown_opcode_survives_decode() {
        let backend = Lua54;
        let decoded = backend.decode(0x7F | (4 << POS_A));
        assert_eq!(decoded.op, 0x7F);
        assert_eq!(decoded.a, 4);
        assert_eq!(decoded.opcode(), None);
        assert!(backend.op_info(0x7F).is_none());
        assert_eq!(backend.op_count(), 83);
    }
}
