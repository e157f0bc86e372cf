//! Register management and polling for Modbus devices based on
//! [tokio-modbus](https://github.com/slowtec/tokio-modbus).
//!
//! ## Register definitions
//!
//! Every device on the bus is described by a plain text file with one statement per line:
//!
//! ```text
//! <action> at <hex address> as <datatype> <access class>
//! ```
//!
//! - `action` - `read` or `write`; only `write` registers accept writes,
//! - `hex address` - register address, `0x` prefix optional,
//! - `datatype` - `BOOL`, `U64-WIDE` or `F32-WIDE`; any other tag is kept but never decoded,
//! - `access class` - `discrete`, `input` or `holding`.
//!
//! Multi-register values are big-endian: the most significant word is at the lowest address.
//!
//! ## Polling
//!
//! [`engine::Engine`] owns the [`registry::Registry`] and a [`bus::BusClient`] and serializes
//! all bus traffic. Each poll cycle issues at most one batched read per non-empty access class
//! of each device and commits a device's values only after all of its reads succeeded.
//!
//! The bus is either a real Modbus TCP/RTU connection ([`client::ModbusBus`]) or an in-memory
//! simulation ([`simulator::SimulatedBus`]).

/// Register batches and the bus client trait
pub mod bus;
/// Modbus TCP/RTU client
pub mod client;
/// Utilities for encoding from and decoding to Modbus registers
pub mod codec;
/// JSON configuration and definition discovery
pub mod config;
/// Register definition language
pub mod definition;
/// Serialized owner of the registry and the bus
pub mod engine;
/// Configuration, definition, bus and write errors
pub mod error;
/// Batched polling of all devices
pub mod poll;
/// Register descriptors, datatypes and typed values
pub mod register;
/// Devices and the last known value of every register
pub mod registry;
/// In-memory bus for tests and dry runs
pub mod simulator;
/// Single register writes from user supplied text
pub mod write;

pub use bus::BusClient;
pub use engine::Engine;
pub use error::{BusError, ConfigError, DefinitionError, PolicyViolation, WriteError};
pub use register::{AccessClass, Action, DataType, Descriptor, Value};
pub use registry::{Registry, Row};
