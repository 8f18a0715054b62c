use crate::opcode::OpCode;

/// Bias of the signed 8-bit immediates (sB, sC).
pub const OFFSET_SC: i32 = 127;
/// Bias of the signed 17-bit sBx field.
pub const OFFSET_SBX: i32 = 65535;
/// Bias of the signed 25-bit sJ field.
pub const OFFSET_SJ: i32 = 16_777_215;

/// A decoded instruction in backend-neutral form.
///
/// `bx` is overloaded: it holds Bx, sBx, sJ or Ax depending on the
/// addressing mode of `op`, already unbiased for the signed forms.
/// `op` stays a raw number so that out-of-range opcodes survive decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Instruction {
    pub op: u8,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub k: bool,
    pub bx: i32,
}

impl Instruction {
    /// The opcode, if `op` is a known Lua 5.4 opcode.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_byte(self.op)
    }

    pub fn is(&self, op: OpCode) -> bool {
        self.op == op as u8
    }

    /// B as a signed immediate (sB).
    pub fn sb(&self) -> i32 {
        self.b as i32 - OFFSET_SC
    }

    /// C as a signed immediate (sC).
    pub fn sc(&self) -> i32 {
        self.c as i32 - OFFSET_SC
    }

    /// Destination of a branch at `pc`, for the opcodes whose operand is a
    /// PC-relative offset. May fall outside the code array for malformed input.
    pub fn jump_target(&self, pc: usize) -> Option<i64> {
        let pc = pc as i64;
        let bx = self.bx as i64;
        match self.opcode()? {
            OpCode::Jmp => Some(pc + 1 + bx),
            OpCode::ForLoop | OpCode::TForLoop => Some(pc + 1 - bx),
            OpCode::ForPrep => Some(pc + 1 + bx + 1),
            _ => None,
        }
    }

    pub fn abc(op: OpCode, a: u8, b: u8, c: u8, k: bool) -> Self {
        Self { op: op as u8, a, b, c, k, bx: 0 }
    }

    pub fn abx(op: OpCode, a: u8, bx: i32) -> Self {
        Self { op: op as u8, a, bx, ..Self::default() }
    }

    pub fn sj(op: OpCode, sj: i32) -> Self {
        Self { op: op as u8, bx: sj, ..Self::default() }
    }
}
