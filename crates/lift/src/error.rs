use thiserror::Error;

/// A function could not be decompiled. Every variant names the offending
/// instruction index within its own prototype.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompileError {
    #[error("constant index {index} out of range at instruction {pc}")]
    ConstantOutOfRange { pc: usize, index: usize },

    #[error("register {register} exceeds stack size {max_stack_size} at instruction {pc}")]
    RegisterOutOfRange {
        pc: usize,
        register: usize,
        max_stack_size: u8,
    },

    #[error("prototype index {index} out of range at instruction {pc}")]
    ProtoOutOfRange { pc: usize, index: usize },

    #[error("upvalue index {index} out of range at instruction {pc}")]
    UpvalueOutOfRange { pc: usize, index: usize },

    #[error("in closure created at instruction {pc}: {source}")]
    Nested {
        pc: usize,
        source: Box<DecompileError>,
    },
}

impl DecompileError {
    /// Instruction index in the function that reported the error.
    pub fn pc(&self) -> usize {
        match self {
            DecompileError::ConstantOutOfRange { pc, .. }
            | DecompileError::RegisterOutOfRange { pc, .. }
            | DecompileError::ProtoOutOfRange { pc, .. }
            | DecompileError::UpvalueOutOfRange { pc, .. }
            | DecompileError::Nested { pc, .. } => *pc,
        }
    }
}
