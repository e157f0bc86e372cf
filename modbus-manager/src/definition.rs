//! Register definition language.
//!
//! One statement per line, six whitespace separated fields:
//!
//! ```text
//! read  at 0x0A as F32-WIDE holding
//! write at 0x01 as BOOL     discrete
//! ```
//!
//! The fields are `action`, a marker, the hexadecimal address, a marker, the
//! datatype tag and the access class. Markers are not interpreted. Blank lines
//! are allowed, comments are not. The first bad statement aborts the whole source.

use std::io::BufRead;

use crate::codec::Address;
use crate::error::DefinitionError;
use crate::register::{AccessClass, Action, DataType, Descriptor};

const FIELD_COUNT: usize = 6;

/// Compile the definition source of one device into its descriptors, in source order.
pub fn parse_definitions(
    source: &str,
    device: &str,
    slave_address: u8,
) -> Result<Vec<Descriptor>, DefinitionError> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_statement(i + 1, line.trim(), device, slave_address))
        .collect()
}

/// Same as [`parse_definitions`] for a character stream.
pub fn parse_reader<R: BufRead>(
    reader: R,
    device: &str,
    slave_address: u8,
) -> Result<Vec<Descriptor>, DefinitionError> {
    let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
    parse_definitions(&lines.join("\n"), device, slave_address)
}

fn parse_statement(
    line_no: usize,
    line: &str,
    device: &str,
    slave_address: u8,
) -> Result<Descriptor, DefinitionError> {
    let malformed = |reason| DefinitionError::Malformed {
        line_no,
        line: line.to_string(),
        reason,
    };

    let fields = line.split_whitespace().collect::<Vec<_>>();
    let action = Action::from_tag(fields[0])
        .ok_or_else(|| malformed("statement doesn't start with 'read' or 'write'"))?;
    if fields.len() != FIELD_COUNT {
        return Err(malformed("expected 6 fields"));
    }

    let address =
        parse_hex_address(fields[2]).ok_or_else(|| DefinitionError::InvalidAddress {
            line_no,
            line: line.to_string(),
            address: fields[2].to_string(),
        })?;
    let datatype = DataType::from_tag(fields[4]);
    let access_class = AccessClass::from_tag(fields[5])
        .ok_or_else(|| malformed("access class must be 'discrete', 'input' or 'holding'"))?;

    Ok(Descriptor {
        device: device.to_string(),
        slave_address,
        access_class,
        action,
        address,
        datatype,
    })
}

/// Parse a hexadecimal register address, `0x` prefix optional. Only hex digits are accepted.
pub fn parse_hex_address(field: &str) -> Option<Address> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str_radix(digits, 16).ok()
}
