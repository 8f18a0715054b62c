pub mod backend;
pub mod chunk;
pub mod constant;
pub mod disasm;
pub mod instruction;
pub mod opcode;
pub mod proto;
pub mod scope_tree;

use nom::number::complete::le_u8;
use nom::IResult;
use thiserror::Error;

pub use backend::{Backend, Lua54, OpInfo};
pub use instruction::Instruction;
pub use opcode::{OpCode, OpMode};
pub use proto::Prototype;

/// Errors from loading a binary chunk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("not a binary chunk")]
    NotBinaryChunk,
    #[error("version mismatch: expected 0x54, found {0:#04x}")]
    Version(u8),
    #[error("format mismatch: {0}")]
    Format(u8),
    #[error("corrupted chunk header")]
    Corrupted,
    #[error("{what} size mismatch: expected {expected}, found {found}")]
    SizeMismatch {
        what: &'static str,
        expected: u8,
        found: u8,
    },
    #[error("integer format mismatch")]
    Endianness,
    #[error("float format mismatch")]
    FloatFormat,
    #[error("truncated chunk")]
    Truncated,
    #[error("malformed chunk: {0}")]
    Malformed(String),
}

/// Parse a size in the `luac` varint encoding: big-endian 7-bit groups,
/// the final byte flagged with the high bit.
pub(crate) fn parse_varint(input: &[u8]) -> IResult<&[u8], usize> {
    let mut result: usize = 0;
    let mut i = input;
    loop {
        let (rest, byte) = le_u8(i)?;
        result = match result.checked_mul(128) {
            Some(shifted) => shifted | (byte & 0x7F) as usize,
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::TooLarge,
                )))
            }
        };
        i = rest;
        if byte & 0x80 != 0 {
            return Ok((i, result));
        }
    }
}

/// Parse a length-prefixed list using varint length.
pub(crate) fn parse_list<'a, T>(
    input: &'a [u8],
    parser: impl Fn(&'a [u8]) -> IResult<&'a [u8], T>,
) -> IResult<&'a [u8], Vec<T>> {
    let (input, length) = parse_varint(input)?;
    // Every element takes at least one byte; refuse absurd lengths early.
    if length > input.len() {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    let mut items = Vec::with_capacity(length);
    let mut input = input;
    for _ in 0..length {
        let (rest, item) = parser(input)?;
        items.push(item);
        input = rest;
    }
    Ok((input, items))
}

/// Parse a string: size 0 is a null string, otherwise `size - 1` bytes follow.
pub(crate) fn parse_string(input: &[u8]) -> IResult<&[u8], Option<Vec<u8>>> {
    let (input, size) = parse_varint(input)?;
    if size == 0 {
        return Ok((input, None));
    }
    let (rest, bytes) = nom::bytes::complete::take(size - 1)(input)?;
    Ok((rest, Some(bytes.to_owned())))
}

/// Deserialize a Lua 5.4 binary chunk (as written by `luac` or `string.dump`).
pub fn undump(bytes: &[u8]) -> Result<chunk::Chunk, LoadError> {
    chunk::Chunk::load(bytes)
}
