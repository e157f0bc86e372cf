use std::fmt;

use crate::codec::{Address, Decode, Encode, Quantity, Word, WordsCountError};

/// Modbus register family a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessClass {
    /// Single bit, read from discrete inputs (or coils) and written as a coil.
    Discrete,
    /// Read-only 16-bit input registers.
    Input,
    /// Read/write 16-bit holding registers.
    Holding,
}

impl AccessClass {
    /// Polling order within one device.
    pub const ALL: [AccessClass; 3] = [
        AccessClass::Discrete,
        AccessClass::Input,
        AccessClass::Holding,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "discrete" => Some(AccessClass::Discrete),
            "input" => Some(AccessClass::Input),
            "holding" => Some(AccessClass::Holding),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessClass::Discrete => "discrete",
            AccessClass::Input => "input",
            AccessClass::Holding => "holding",
        }
    }
}

impl fmt::Display for AccessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Declared intent of a register definition statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Write,
}

impl Action {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "read" => Some(Action::Read),
            "write" => Some(Action::Write),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Datatype tag selecting the decode and encode rules of a register.
///
/// Unknown tags are kept verbatim in [`DataType::Other`] so newer definition
/// files still load; such registers are never decoded nor written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// `BOOL`
    Bool,
    /// `U64-WIDE` (alias `T64T1234`): unsigned 64-bit over 4 registers, high word first.
    U64Wide,
    /// `F32-WIDE` (alias `F32T1234`): IEEE-754 single over 2 registers, high word first.
    F32Wide,
    Other(String),
}

impl DataType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "BOOL" => DataType::Bool,
            "U64-WIDE" | "T64T1234" => DataType::U64Wide,
            "F32-WIDE" | "F32T1234" => DataType::F32Wide,
            other => DataType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DataType::Bool => "BOOL",
            DataType::U64Wide => "U64-WIDE",
            DataType::F32Wide => "F32-WIDE",
            DataType::Other(tag) => tag,
        }
    }

    /// Register encoding of the datatype, `None` when it is not a numeric register type.
    pub fn numeric(&self) -> Option<NumericType> {
        match self {
            DataType::U64Wide => Some(NumericType::U64Wide),
            DataType::F32Wide => Some(NumericType::F32Wide),
            DataType::Bool | DataType::Other(_) => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Datatypes stored in input and holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    U64Wide,
    F32Wide,
}

impl NumericType {
    pub fn word_count(&self) -> Quantity {
        match self {
            NumericType::U64Wide => <u64 as Decode>::WORDS,
            NumericType::F32Wide => <f32 as Decode>::WORDS,
        }
    }

    pub fn decode(&self, words: &[Word]) -> Result<Value, WordsCountError> {
        match self {
            NumericType::U64Wide => u64::from_be_words(words).map(Value::U64),
            NumericType::F32Wide => f32::from_be_words(words).map(Value::F32),
        }
    }
}

/// Last known (or user supplied) value of a register.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    Bool(bool),
    U64(u64),
    F32(f32),
    #[default]
    Unset,
}

impl Value {
    /// Whether the value tag is the one produced by `datatype`.
    pub fn matches(&self, datatype: &DataType) -> bool {
        matches!(
            (self, datatype),
            (Value::Bool(_), DataType::Bool)
                | (Value::U64(_), DataType::U64Wide)
                | (Value::F32(_), DataType::F32Wide)
                | (Value::Unset, _)
        )
    }

    /// Register words of a numeric value, `None` for `Bool` and `Unset`.
    pub fn to_words(&self) -> Option<Vec<Word>> {
        match *self {
            Value::U64(v) => Some(v.to_be_words()),
            Value::F32(v) => Some(v.to_be_words()),
            Value::Bool(_) | Value::Unset => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::Unset => f.write_str("-"),
        }
    }
}

/// One addressable register (or coil) of one device, as declared in its definition source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub device: String,
    pub slave_address: u8,
    pub access_class: AccessClass,
    pub action: Action,
    pub address: Address,
    pub datatype: DataType,
}
