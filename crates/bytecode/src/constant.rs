use std::fmt;

use nom::number::complete::{le_f64, le_i64, le_u8};
use nom::IResult;

use crate::parse_string;

/// A constant value in the function's constant table.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
}

// Type tags with variant bits, as written by `luac` 5.4.
const TAG_NIL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x11;
const TAG_INTEGER: u8 = 0x03;
const TAG_FLOAT: u8 = 0x13;
const TAG_SHORT_STRING: u8 = 0x04;
const TAG_LONG_STRING: u8 = 0x14;

impl Constant {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = le_u8(input)?;
        match tag {
            TAG_NIL => Ok((input, Constant::Nil)),
            TAG_FALSE => Ok((input, Constant::Boolean(false))),
            TAG_TRUE => Ok((input, Constant::Boolean(true))),
            TAG_INTEGER => {
                let (input, val) = le_i64(input)?;
                Ok((input, Constant::Integer(val)))
            }
            TAG_FLOAT => {
                let (input, val) = le_f64(input)?;
                Ok((input, Constant::Float(val)))
            }
            TAG_SHORT_STRING | TAG_LONG_STRING => {
                let (rest, bytes) = parse_string(input)?;
                match bytes {
                    Some(bytes) => Ok((rest, Constant::String(bytes))),
                    None => Err(nom::Err::Failure(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Verify,
                    ))),
                }
            }
            _ => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            ))),
        }
    }

    /// The string payload, if this is a string constant.
    pub fn as_str(&self) -> Option<&[u8]> {
        match self {
            Constant::String(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => f.write_str("nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(n) => write!(f, "{n}"),
            Constant::Float(n) => write!(f, "{n:?}"),
            Constant::String(bytes) => {
                f.write_str("\"")?;
                for &byte in bytes {
                    match byte {
                        b'"' => f.write_str("\\\"")?,
                        b'\\' => f.write_str("\\\\")?,
                        b'\n' => f.write_str("\\n")?,
                        b'\r' => f.write_str("\\r")?,
                        b'\t' => f.write_str("\\t")?,
                        0x07 => f.write_str("\\a")?,
                        0x08 => f.write_str("\\b")?,
                        0x0C => f.write_str("\\f")?,
                        0x0B => f.write_str("\\v")?,
                        0x20..=0x7E => write!(f, "{}", byte as char)?,
                        _ => write!(f, "\\x{byte:02x}")?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}
