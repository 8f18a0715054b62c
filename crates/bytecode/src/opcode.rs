/// Lua 5.4 opcodes, in `lopcodes.h` order.
///
/// Each variant documents the instruction format and operand usage.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// MOVE: R[A] = R[B]
    Move = 0,
    /// LOADI: R[A] = sBx
    LoadI,
    /// LOADF: R[A] = (float)sBx
    LoadF,
    /// LOADK: R[A] = K[Bx]
    LoadK,
    /// LOADKX: R[A] = K[extra arg]
    LoadKX,
    /// LOADFALSE: R[A] = false
    LoadFalse,
    /// LFALSESKIP: R[A] = false; pc++
    LFalseSkip,
    /// LOADTRUE: R[A] = true
    LoadTrue,
    /// LOADNIL: R[A], R[A+1], ..., R[A+B] = nil
    LoadNil,
    /// GETUPVAL: R[A] = UpValue[B]
    GetUpval,
    /// SETUPVAL: UpValue[B] = R[A]
    SetUpval,
    /// GETTABUP: R[A] = UpValue[B][K[C]:string]
    GetTabUp,
    /// GETTABLE: R[A] = R[B][R[C]]
    GetTable,
    /// GETI: R[A] = R[B][C]
    GetI,
    /// GETFIELD: R[A] = R[B][K[C]:string]
    GetField,
    /// SETTABUP: UpValue[A][K[B]:string] = RK(C)
    SetTabUp,
    /// SETTABLE: R[A][R[B]] = RK(C)
    SetTable,
    /// SETI: R[A][B] = RK(C)
    SetI,
    /// SETFIELD: R[A][K[B]:string] = RK(C)
    SetField,
    /// NEWTABLE: R[A] = {}
    NewTable,
    /// SELF: R[A+1] = R[B]; R[A] = R[B][RK(C):string]
    Self_,
    /// ADDI: R[A] = R[B] + sC
    AddI,
    /// ADDK: R[A] = R[B] + K[C]:number
    AddK,
    /// SUBK: R[A] = R[B] - K[C]:number
    SubK,
    /// MULK: R[A] = R[B] * K[C]:number
    MulK,
    /// MODK: R[A] = R[B] % K[C]:number
    ModK,
    /// POWK: R[A] = R[B] ^ K[C]:number
    PowK,
    /// DIVK: R[A] = R[B] / K[C]:number
    DivK,
    /// IDIVK: R[A] = R[B] // K[C]:number
    IDivK,
    /// BANDK: R[A] = R[B] & K[C]:integer
    BAndK,
    /// BORK: R[A] = R[B] | K[C]:integer
    BOrK,
    /// BXORK: R[A] = R[B] ~ K[C]:integer
    BXorK,
    /// SHRI: R[A] = R[B] >> sC
    ShrI,
    /// SHLI: R[A] = sC << R[B]
    ShlI,
    /// ADD: R[A] = R[B] + R[C]
    Add,
    /// SUB: R[A] = R[B] - R[C]
    Sub,
    /// MUL: R[A] = R[B] * R[C]
    Mul,
    /// MOD: R[A] = R[B] % R[C]
    Mod,
    /// POW: R[A] = R[B] ^ R[C]
    Pow,
    /// DIV: R[A] = R[B] / R[C]
    Div,
    /// IDIV: R[A] = R[B] // R[C]
    IDiv,
    /// BAND: R[A] = R[B] & R[C]
    BAnd,
    /// BOR: R[A] = R[B] | R[C]
    BOr,
    /// BXOR: R[A] = R[B] ~ R[C]
    BXor,
    /// SHL: R[A] = R[B] << R[C]
    Shl,
    /// SHR: R[A] = R[B] >> R[C]
    Shr,
    /// MMBIN: call C metamethod over R[A] and R[B]
    MmBin,
    /// MMBINI: call C metamethod over R[A] and sB
    MmBinI,
    /// MMBINK: call C metamethod over R[A] and K[B]
    MmBinK,
    /// UNM: R[A] = -R[B]
    Unm,
    /// BNOT: R[A] = ~R[B]
    BNot,
    /// NOT: R[A] = not R[B]
    Not,
    /// LEN: R[A] = #R[B] (length operator)
    Len,
    /// CONCAT: R[A] = R[A].. ... ..R[A + B - 1]
    Concat,
    /// CLOSE: close all upvalues >= R[A]
    Close,
    /// TBC: mark variable A "to be closed"
    Tbc,
    /// JMP: pc += sJ
    Jmp,
    /// EQ: if ((R[A] == R[B]) ~= k) then pc++
    Eq,
    /// LT: if ((R[A] < R[B]) ~= k) then pc++
    Lt,
    /// LE: if ((R[A] <= R[B]) ~= k) then pc++
    Le,
    /// EQK: if ((R[A] == K[B]) ~= k) then pc++
    EqK,
    /// EQI: if ((R[A] == sB) ~= k) then pc++
    EqI,
    /// LTI: if ((R[A] < sB) ~= k) then pc++
    LtI,
    /// LEI: if ((R[A] <= sB) ~= k) then pc++
    LeI,
    /// GTI: if ((R[A] > sB) ~= k) then pc++
    GtI,
    /// GEI: if ((R[A] >= sB) ~= k) then pc++
    GeI,
    /// TEST: if (not R[A] == k) then pc++
    Test,
    /// TESTSET: if (not R[B] == k) then pc++ else R[A] = R[B]
    TestSet,
    /// CALL: R[A], ... ,R[A+C-2] = R[A](R[A+1], ... ,R[A+B-1])
    Call,
    /// TAILCALL: return R[A](R[A+1], ... ,R[A+B-1])
    TailCall,
    /// RETURN: return R[A], ... ,R[A+B-2]
    Return,
    /// RETURN0: return
    Return0,
    /// RETURN1: return R[A]
    Return1,
    /// FORLOOP: update counters; if loop continues then pc -= Bx
    ForLoop,
    /// FORPREP: check values and prepare counters; if not to run then pc += Bx + 1
    ForPrep,
    /// TFORPREP: create upvalue for R[A + 3]; pc += Bx
    TForPrep,
    /// TFORCALL: R[A+4], ... ,R[A+3+C] = R[A](R[A+1], R[A+2])
    TForCall,
    /// TFORLOOP: if R[A+2] ~= nil then { R[A] = R[A+2]; pc -= Bx }
    TForLoop,
    /// SETLIST: R[A][C+i] = R[A+i], 1 <= i <= B
    SetList,
    /// CLOSURE: R[A] = closure(KPROTO[Bx])
    Closure,
    /// VARARG: R[A], R[A+1], ..., R[A+C-2] = vararg
    VarArg,
    /// VARARGPREP: adjust vararg parameters
    VarArgPrep,
    /// EXTRAARG: extra (larger) argument for previous opcode
    ExtraArg,
}

/// Instruction operand layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// op(7) A(8) k(1) B(8) C(8)
    IABC,
    /// op(7) A(8) Bx(17)
    IABx,
    /// op(7) A(8) sBx(17)
    IAsBx,
    /// op(7) Ax(25)
    IAx,
    /// op(7) sJ(25)
    IsJ,
}

/// Number of opcodes in the Lua 5.4 instruction set.
pub const NUM_OPCODES: usize = 83;

const ALL: [OpCode; NUM_OPCODES] = {
    use OpCode::*;
    [
        Move, LoadI, LoadF, LoadK, LoadKX, LoadFalse, LFalseSkip, LoadTrue, LoadNil, GetUpval,
        SetUpval, GetTabUp, GetTable, GetI, GetField, SetTabUp, SetTable, SetI, SetField,
        NewTable, Self_, AddI, AddK, SubK, MulK, ModK, PowK, DivK, IDivK, BAndK, BOrK, BXorK,
        ShrI, ShlI, Add, Sub, Mul, Mod, Pow, Div, IDiv, BAnd, BOr, BXor, Shl, Shr, MmBin,
        MmBinI, MmBinK, Unm, BNot, Not, Len, Concat, Close, Tbc, Jmp, Eq, Lt, Le, EqK, EqI, LtI,
        LeI, GtI, GeI, Test, TestSet, Call, TailCall, Return, Return0, Return1, ForLoop, ForPrep,
        TForPrep, TForCall, TForLoop, SetList, Closure, VarArg, VarArgPrep, ExtraArg,
    ]
};

const NAMES: [&str; NUM_OPCODES] = [
    "MOVE", "LOADI", "LOADF", "LOADK", "LOADKX", "LOADFALSE", "LFALSESKIP", "LOADTRUE", "LOADNIL",
    "GETUPVAL", "SETUPVAL", "GETTABUP", "GETTABLE", "GETI", "GETFIELD", "SETTABUP", "SETTABLE",
    "SETI", "SETFIELD", "NEWTABLE", "SELF", "ADDI", "ADDK", "SUBK", "MULK", "MODK", "POWK", "DIVK",
    "IDIVK", "BANDK", "BORK", "BXORK", "SHRI", "SHLI", "ADD", "SUB", "MUL", "MOD", "POW", "DIV",
    "IDIV", "BAND", "BOR", "BXOR", "SHL", "SHR", "MMBIN", "MMBINI", "MMBINK", "UNM", "BNOT", "NOT",
    "LEN", "CONCAT", "CLOSE", "TBC", "JMP", "EQ", "LT", "LE", "EQK", "EQI", "LTI", "LEI", "GTI",
    "GEI", "TEST", "TESTSET", "CALL", "TAILCALL", "RETURN", "RETURN0", "RETURN1", "FORLOOP",
    "FORPREP", "TFORPREP", "TFORCALL", "TFORLOOP", "SETLIST", "CLOSURE", "VARARG", "VARARGPREP",
    "EXTRAARG",
];

impl OpCode {
    /// Convert a raw opcode number to an OpCode, returning None if out of range.
    pub fn from_byte(byte: u8) -> Option<Self> {
        ALL.get(byte as usize).copied()
    }

    /// Mnemonic as printed by `luac -l`.
    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    pub fn mode(self) -> OpMode {
        match self {
            OpCode::LoadI | OpCode::LoadF => OpMode::IAsBx,
            OpCode::LoadK
            | OpCode::LoadKX
            | OpCode::ForLoop
            | OpCode::ForPrep
            | OpCode::TForPrep
            | OpCode::TForLoop
            | OpCode::Closure => OpMode::IABx,
            OpCode::Jmp => OpMode::IsJ,
            OpCode::ExtraArg => OpMode::IAx,
            _ => OpMode::IABC,
        }
    }

    /// Whether this opcode is a test that skips the next instruction
    /// (always a JMP in compiler output).
    pub fn is_test(self) -> bool {
        matches!(
            self,
            OpCode::Eq
                | OpCode::Lt
                | OpCode::Le
                | OpCode::EqK
                | OpCode::EqI
                | OpCode::LtI
                | OpCode::LeI
                | OpCode::GtI
                | OpCode::GeI
                | OpCode::Test
                | OpCode::TestSet
        )
    }
}
