use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_f64, le_i64, le_u8};
use nom::IResult;

use crate::proto::Prototype;
use crate::LoadError;

const SIGNATURE: &[u8] = b"\x1bLua";
const VERSION: u8 = 0x54;
const FORMAT: u8 = 0;
const LUAC_DATA: &[u8] = b"\x19\x93\r\n\x1a\n";
const INSTRUCTION_SIZE: u8 = 4;
const INTEGER_SIZE: u8 = 8;
const NUMBER_SIZE: u8 = 8;
const LUAC_INT: i64 = 0x5678;
const LUAC_NUM: f64 = 370.5;

/// A parsed Lua 5.4 binary chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Number of upvalues of the main function (normally 1, `_ENV`).
    pub upvalue_count: u8,
    pub main: Prototype,
}

impl Chunk {
    pub(crate) fn load(input: &[u8]) -> Result<Self, LoadError> {
        let input = check_header(input)?;
        match parse_body(input) {
            Ok((_, chunk)) => Ok(chunk),
            Err(err) => Err(LoadError::Malformed(err.to_string())),
        }
    }
}

fn parse_body(input: &[u8]) -> IResult<&[u8], Chunk> {
    let (input, upvalue_count) = le_u8(input)?;
    let (input, main) = Prototype::parse(input, None)?;
    Ok((
        input,
        Chunk {
            upvalue_count,
            main,
        },
    ))
}

fn check_header(input: &[u8]) -> Result<&[u8], LoadError> {
    let truncated = |_: nom::Err<nom::error::Error<&[u8]>>| LoadError::Truncated;

    let (input, _) = tag::<_, _, nom::error::Error<&[u8]>>(SIGNATURE)(input)
        .map_err(|_| LoadError::NotBinaryChunk)?;
    let (input, version) = le_u8(input).map_err(truncated)?;
    if version != VERSION {
        return Err(LoadError::Version(version));
    }
    let (input, format) = le_u8(input).map_err(truncated)?;
    if format != FORMAT {
        return Err(LoadError::Format(format));
    }
    let (input, data) = take(LUAC_DATA.len())(input).map_err(truncated)?;
    if data != LUAC_DATA {
        return Err(LoadError::Corrupted);
    }

    let mut input = input;
    for (what, expected) in [
        ("Instruction", INSTRUCTION_SIZE),
        ("lua_Integer", INTEGER_SIZE),
        ("lua_Number", NUMBER_SIZE),
    ] {
        let (rest, found) = le_u8(input).map_err(truncated)?;
        if found != expected {
            return Err(LoadError::SizeMismatch {
                what,
                expected,
                found,
            });
        }
        input = rest;
    }

    let (input, int_check) = le_i64(input).map_err(truncated)?;
    if int_check != LUAC_INT {
        return Err(LoadError::Endianness);
    }
    let (input, num_check) = le_f64(input).map_err(truncated)?;
    if num_check != LUAC_NUM {
        return Err(LoadError::FloatFormat);
    }
    Ok(input)
}

/// Write a chunk header, for building chunks in tests.
#[cfg(test)]
pub(crate) fn header() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.push(VERSION);
    out.push(FORMAT);
    out.extend_from_slice(LUAC_DATA);
    out.extend_from_slice(&[INSTRUCTION_SIZE, INTEGER_SIZE, NUMBER_SIZE]);
    out.extend_from_slice(&LUAC_INT.to_le_bytes());
    out.extend_from_slice(&LUAC_NUM.to_le_bytes());
    out
}
