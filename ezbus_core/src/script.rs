//! Port access scripts. A script stands in for the CPU: each op is one
//! `IN` or `OUT` instruction, and the script restarts from the top once it
//! runs out.
//!
//! ```text
//! # poll the status port, then write the data port
//! in  0xE010
//! out 0x0011 $42
//! ```

use crate::debugger::command::{parse_literal_u16, parse_literal_u8};
use crate::errors::{CoreError, ScriptError};

use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{space0, space1};
use nom::combinator::{all_consuming, map};
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOp {
    In(u16),
    Out(u16, u8),
}

impl ScriptOp {
    pub fn port(&self) -> u16 {
        match *self {
            ScriptOp::In(port) | ScriptOp::Out(port, _) => port,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortScript {
    ops: Vec<ScriptOp>,
    cursor: usize,
}

impl PortScript {
    pub fn new(ops: Vec<ScriptOp>) -> PortScript {
        PortScript { ops, cursor: 0 }
    }

    pub fn parse(text: &str) -> Result<PortScript, ScriptError> {
        let mut ops = Vec::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = match raw_line.find('#') {
                Some(comment) => &raw_line[..comment],
                None => raw_line,
            };
            if line.trim().is_empty() {
                continue;
            }

            match all_consuming(delimited(space0, parse_op, space0))(line) {
                Ok((_, op)) => ops.push(op),
                Err(_) => {
                    return Err(ScriptError::Syntax {
                        line: index + 1,
                        text: raw_line.trim().to_string(),
                    })
                }
            }
        }
        Ok(PortScript::new(ops))
    }

    pub fn from_file(path: &Path) -> Result<PortScript, CoreError> {
        let text = fs::read_to_string(path)?;
        Ok(PortScript::parse(&text)?)
    }

    /// Next op, wrapping back to the first one. `None` for an empty script.
    pub fn next_op(&mut self) -> Option<ScriptOp> {
        if self.ops.is_empty() {
            return None;
        }
        let op = self.ops[self.cursor];
        self.cursor = (self.cursor + 1) % self.ops.len();
        Some(op)
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn ops(&self) -> &[ScriptOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl FromStr for PortScript {
    type Err = ScriptError;

    fn from_str(text: &str) -> Result<PortScript, ScriptError> {
        PortScript::parse(text)
    }
}

fn parse_op(input: &str) -> IResult<&str, ScriptOp> {
    alt((parse_in, parse_out))(input)
}

fn parse_in(input: &str) -> IResult<&str, ScriptOp> {
    map(
        preceded(tag_no_case("in"), preceded(space1, parse_literal_u16)),
        ScriptOp::In,
    )(input)
}

fn parse_out(input: &str) -> IResult<&str, ScriptOp> {
    map(
        tuple((
            tag_no_case("out"),
            preceded(space1, parse_literal_u16),
            preceded(space1, parse_literal_u8),
        )),
        |(_, port, value)| ScriptOp::Out(port, value),
    )(input)
}
