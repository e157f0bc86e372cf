//! Error types of the register engine.
//!
//! ```text
//! ConfigError      - fatal at startup (bad configuration, definitions, duplicates)
//! └── DefinitionError  - malformed register definition statement
//! BusError         - scoped to one device poll or one write attempt
//! WriteError       - scoped to one write attempt
//! ├── ValueFormat  - text does not parse as the register datatype
//! ├── Policy       - the register does not accept this write
//! └── Bus
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::codec::{Address, WordsCountError};
use crate::register::{AccessClass, DataType};

/// Failure to compile a register definition source.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("line {line_no}: malformed statement '{line}': {reason}")]
    Malformed {
        line_no: usize,
        line: String,
        reason: &'static str,
    },

    #[error("line {line_no}: invalid hex address '{address}' in statement '{line}'")]
    InvalidAddress {
        line_no: usize,
        line: String,
        address: String,
    },

    #[error("failed to read register definitions: {0}")]
    Io(#[from] std::io::Error),
}

impl DefinitionError {
    /// Text of the offending statement, if the error points at one.
    pub fn line(&self) -> Option<&str> {
        match self {
            DefinitionError::Malformed { line, .. }
            | DefinitionError::InvalidAddress { line, .. } => Some(line),
            DefinitionError::Io(_) => None,
        }
    }
}

/// Startup configuration error. The process does not proceed past it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("device '{device}': {source}")]
    Definition {
        device: String,
        #[source]
        source: DefinitionError,
    },

    #[error("device '{device}': duplicate {access_class} address 0x{address:X}")]
    DuplicateAddress {
        device: String,
        access_class: AccessClass,
        address: Address,
    },

    #[error("device name '{0}' is used twice")]
    DuplicateDevice(String),

    #[error("no serial bus configured")]
    NoBus,
}

/// Failure of a single Bus Client call.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("cannot connect to '{url}': {source}")]
    Connect {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bus url '{0}'")]
    InvalidUrl(String),

    #[error("bus call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device answered with exception {0}")]
    Exception(String),

    #[error("invalid slave address {0}")]
    InvalidSlave(u8),

    #[error("unexpected response size: {0}")]
    Decode(#[from] WordsCountError),
}

/// Reason a register refuses a write, independent of the supplied value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("no {access_class} register 0x{address:X} on device '{device}'")]
    UnknownRegister {
        device: String,
        access_class: AccessClass,
        address: Address,
    },

    #[error("register is declared 'read'")]
    ReadOnlyAction,

    #[error("input registers are read-only")]
    InputRegister,

    #[error("BOOL values are written to discrete registers only")]
    BoolOutsideDiscrete,

    #[error("{0} values are written to holding registers only")]
    NumericOutsideHolding(DataType),

    #[error("datatype {0} cannot be written")]
    UnsupportedDatatype(DataType),
}

/// Rejected or failed write. The stored value is unchanged in every case.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("'{text}' is not a valid {datatype} value: {reason}")]
    ValueFormat {
        text: String,
        datatype: DataType,
        reason: String,
    },

    #[error("write refused: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("no value to write")]
    NoValue,

    #[error(transparent)]
    Bus(#[from] BusError),
}
