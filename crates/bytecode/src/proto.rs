use nom::number::complete::{le_u32, le_u8};
use nom::IResult;

use crate::constant::Constant;
use crate::scope_tree::ScopeTree;
use crate::{parse_list, parse_string, parse_varint};

/// Upvalue descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalDesc {
    /// Debug name (stripped chunks have none).
    pub name: Option<String>,
    /// Whether the upvalue captures a register of the enclosing function
    /// (as opposed to one of its upvalues).
    pub in_stack: bool,
    pub index: u8,
    pub kind: u8,
}

/// A `locvars` debug entry: a named local alive over `[start_pc, end_pc)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Absolute line anchor for the delta-encoded line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsLineInfo {
    pub pc: u32,
    pub line: u32,
}

/// A compiled function prototype.
#[derive(Debug, Clone, Default)]
pub struct Prototype {
    pub source: Option<String>,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    /// Raw instruction words; decode them through a `Backend`.
    pub code: Vec<u32>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalDesc>,
    /// Nested prototypes, indexed by CLOSURE's Bx.
    pub protos: Vec<Prototype>,
    pub line_info: Vec<i8>,
    pub abs_line_info: Vec<AbsLineInfo>,
    pub local_vars: Vec<LocalVar>,
}

impl Prototype {
    /// Register-indexed view of the `locvars` table.
    pub fn scope_tree(&self) -> ScopeTree {
        ScopeTree::from_locals(&self.local_vars)
    }

    /// Debug name of upvalue `index`, if present.
    pub fn upvalue_name(&self, index: usize) -> Option<&str> {
        self.upvalues.get(index)?.name.as_deref()
    }

    pub(crate) fn parse<'a>(
        input: &'a [u8],
        parent_source: Option<&str>,
    ) -> IResult<&'a [u8], Self> {
        let (input, source) = parse_string(input)?;
        let source = source
            .map(|s| String::from_utf8_lossy(&s).into_owned())
            .or_else(|| parent_source.map(str::to_owned));

        let (input, line_defined) = parse_varint(input)?;
        let (input, last_line_defined) = parse_varint(input)?;
        let (input, num_params) = le_u8(input)?;
        let (input, is_vararg) = le_u8(input)?;
        let (input, max_stack_size) = le_u8(input)?;

        let (input, code) = parse_list(input, le_u32)?;
        let (input, constants) = parse_list(input, Constant::parse)?;
        let (input, mut upvalues) = parse_list(input, parse_upvalue)?;

        let (input, count) = parse_varint(input)?;
        let mut protos = Vec::with_capacity(count);
        let mut input = input;
        for _ in 0..count {
            let (rest, child) = Prototype::parse(input, source.as_deref())?;
            protos.push(child);
            input = rest;
        }

        // Debug info: line deltas, absolute anchors, locals, upvalue names.
        let (input, line_info) = parse_list(input, |i| {
            le_u8(i).map(|(rest, b)| (rest, b as i8))
        })?;
        let (input, abs_line_info) = parse_list(input, |i| {
            let (i, pc) = parse_varint(i)?;
            let (i, line) = parse_varint(i)?;
            Ok((
                i,
                AbsLineInfo {
                    pc: pc as u32,
                    line: line as u32,
                },
            ))
        })?;
        let (input, local_vars) = parse_list(input, parse_local)?;
        let (input, upvalue_names) = parse_list(input, parse_string)?;
        for (upvalue, name) in upvalues.iter_mut().zip(upvalue_names) {
            upvalue.name = name.map(|n| String::from_utf8_lossy(&n).into_owned());
        }

        Ok((
            input,
            Prototype {
                source,
                line_defined: line_defined as u32,
                last_line_defined: last_line_defined as u32,
                num_params,
                is_vararg: is_vararg != 0,
                max_stack_size,
                code,
                constants,
                upvalues,
                protos,
                line_info,
                abs_line_info,
                local_vars,
            },
        ))
    }
}

fn parse_upvalue(input: &[u8]) -> IResult<&[u8], UpvalDesc> {
    let (input, in_stack) = le_u8(input)?;
    let (input, index) = le_u8(input)?;
    let (input, kind) = le_u8(input)?;
    Ok((
        input,
        UpvalDesc {
            name: None,
            in_stack: in_stack != 0,
            index,
            kind,
        },
    ))
}

fn parse_local(input: &[u8]) -> IResult<&[u8], LocalVar> {
    let (input, name) = parse_string(input)?;
    let (input, start_pc) = parse_varint(input)?;
    let (input, end_pc) = parse_varint(input)?;
    Ok((
        input,
        LocalVar {
            name: name
                .map(|n| String::from_utf8_lossy(&n).into_owned())
                .unwrap_or_default(),
            start_pc: start_pc as u32,
            end_pc: end_pc as u32,
        },
    ))
}
