use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;

use crate::bus::{validate_slave, BusClient, RegisterTable};
use crate::codec::{Address, Encode, Quantity, Word};
use crate::error::BusError;
use crate::register::{AccessClass, DataType};
use crate::registry::Registry;

const ILLEGAL_DATA_ADDRESS: &str = "IllegalDataAddress";

#[derive(Debug, Clone, Default)]
/// A raw Modbus register (or bit) table.
pub struct Registers<T>(HashMap<Address, T>);

impl<T: Copy> Registers<T> {
    /// Insert new consecutive registers with `values` starting at `addr` address.
    pub fn insert(&mut self, addr: Address, values: Vec<T>) {
        for (i, value) in values.into_iter().enumerate() {
            let reg_addr = addr.wrapping_add(i as Address);
            self.0.insert(reg_addr, value);
        }
    }

    /// Read `cnt` consecutive registers starting at `addr`.
    pub fn read(&self, addr: Address, cnt: Quantity) -> Result<Vec<T>, BusError> {
        (0..cnt)
            .map(|i| {
                let reg_addr = addr.wrapping_add(i);
                self.0.get(&reg_addr).copied().ok_or_else(|| {
                    tracing::debug!(reg_addr, "SIMULATOR: Exception::IllegalDataAddress");
                    BusError::Exception(ILLEGAL_DATA_ADDRESS.to_string())
                })
            })
            .collect()
    }

    /// Write `values` into existing consecutive registers starting at `addr`.
    pub fn write(&mut self, addr: Address, values: &[T]) -> Result<(), BusError> {
        // Check the whole range first so a rejected write leaves the table untouched.
        self.read(addr, values.len() as Quantity)?;
        self.insert(addr, values.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
/// Register tables of one simulated slave. Discrete reads and coil writes share one bit table.
pub struct SimulatedDevice {
    pub bits: Registers<bool>,
    pub input_registers: Registers<Word>,
    pub holding_registers: Registers<Word>,
}

impl SimulatedDevice {
    fn table(&self, table: RegisterTable) -> &Registers<Word> {
        match table {
            RegisterTable::Input => &self.input_registers,
            RegisterTable::Holding => &self.holding_registers,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Bus call as seen by the simulator, recorded in call order.
pub enum BusCall {
    Select(u8),
    ReadDiscrete {
        slave: u8,
        addresses: Vec<Address>,
    },
    ReadRegisters {
        slave: u8,
        table: RegisterTable,
        spans: Vec<(Address, Quantity)>,
    },
    WriteCoil {
        slave: u8,
        address: Address,
        value: bool,
    },
    WriteRegisters {
        slave: u8,
        address: Address,
        words: Vec<Word>,
    },
    Disconnect,
}

impl BusCall {
    /// Whether the call puts a request on the wire.
    pub fn is_transaction(&self) -> bool {
        !matches!(self, BusCall::Select(_) | BusCall::Disconnect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Operation kinds that can be made to fail with [`SimulatedBus::fail`].
pub enum Operation {
    ReadDiscrete,
    ReadInput,
    ReadHolding,
    WriteCoil,
    WriteRegisters,
}

#[derive(Debug, Default)]
struct State {
    devices: HashMap<u8, SimulatedDevice>,
    selected: Option<u8>,
    calls: Vec<BusCall>,
    failures: HashSet<(u8, Operation)>,
}

#[derive(Debug, Clone, Default)]
/// In-process bus with simulated slaves.
///
/// Clones share the same state, so a test can keep a handle to inspect calls and
/// change device data while the engine owns another one.
pub struct SimulatedBus(Arc<Mutex<State>>);

/// Timeout reported for failing operations and absent slaves.
pub const SIMULATED_TIMEOUT: Duration = Duration::from_millis(100);

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate every device of `registry`, with zeroed registers at all declared addresses.
    pub fn from_registry(registry: &Registry) -> Self {
        let bus = Self::new();
        for device in registry.devices() {
            let slave = device.slave_address();
            for register in device.iter() {
                let addr = register.descriptor.address;
                match (register.descriptor.access_class, &register.descriptor.datatype) {
                    (AccessClass::Discrete, _) => bus.set_bit(slave, addr, false),
                    (AccessClass::Input, DataType::U64Wide) => bus.set_input(slave, addr, 0u64),
                    (AccessClass::Input, _) => bus.set_input(slave, addr, 0f32),
                    (AccessClass::Holding, DataType::U64Wide) => bus.set_holding(slave, addr, 0u64),
                    (AccessClass::Holding, _) => bus.set_holding(slave, addr, 0f32),
                }
            }
        }
        bus
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock only happens in a failing test.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_bit(&self, slave: u8, addr: Address, value: bool) {
        self.state()
            .devices
            .entry(slave)
            .or_default()
            .bits
            .insert(addr, vec![value]);
    }

    pub fn set_input<V: Encode>(&self, slave: u8, addr: Address, value: V) {
        self.state()
            .devices
            .entry(slave)
            .or_default()
            .input_registers
            .insert(addr, value.to_be_words());
    }

    pub fn set_holding<V: Encode>(&self, slave: u8, addr: Address, value: V) {
        self.state()
            .devices
            .entry(slave)
            .or_default()
            .holding_registers
            .insert(addr, value.to_be_words());
    }

    /// Snapshot of one simulated slave.
    pub fn device(&self, slave: u8) -> Option<SimulatedDevice> {
        self.state().devices.get(&slave).cloned()
    }

    /// Make `operation` on `slave` time out until [`SimulatedBus::recover`].
    pub fn fail(&self, slave: u8, operation: Operation) {
        self.state().failures.insert((slave, operation));
    }

    pub fn recover(&self, slave: u8, operation: Operation) {
        self.state().failures.remove(&(slave, operation));
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.state().calls.clone()
    }

    /// Calls that reached the wire (reads and writes).
    pub fn transactions(&self) -> Vec<BusCall> {
        self.calls()
            .into_iter()
            .filter(BusCall::is_transaction)
            .collect()
    }
}

impl State {
    /// Record `call` and resolve the addressed slave, failing like a real bus would.
    fn begin(&mut self, call: BusCall, operation: Operation) -> Result<u8, BusError> {
        self.calls.push(call);
        let slave = self
            .selected
            .ok_or_else(|| BusError::Transport("no slave selected".to_string()))?;
        if self.failures.contains(&(slave, operation)) || !self.devices.contains_key(&slave) {
            return Err(BusError::Timeout(SIMULATED_TIMEOUT));
        }
        Ok(slave)
    }

    fn selected_slave(&self) -> u8 {
        self.selected.unwrap_or_default()
    }
}

#[async_trait]
impl BusClient for SimulatedBus {
    async fn select_device(&mut self, slave_address: u8) -> Result<(), BusError> {
        validate_slave(slave_address)?;
        let mut state = self.state();
        state.calls.push(BusCall::Select(slave_address));
        state.selected = Some(slave_address);
        Ok(())
    }

    async fn read_discrete(&mut self, addresses: &[Address]) -> Result<Vec<bool>, BusError> {
        let mut state = self.state();
        let call = BusCall::ReadDiscrete {
            slave: state.selected_slave(),
            addresses: addresses.to_vec(),
        };
        let slave = state.begin(call, Operation::ReadDiscrete)?;
        let device = &state.devices[&slave];
        addresses
            .iter()
            .map(|&addr| device.bits.read(addr, 1).map(|bits| bits[0]))
            .collect()
    }

    async fn read_registers(
        &mut self,
        table: RegisterTable,
        spans: &[(Address, Quantity)],
    ) -> Result<Vec<Vec<Word>>, BusError> {
        let mut state = self.state();
        let call = BusCall::ReadRegisters {
            slave: state.selected_slave(),
            table,
            spans: spans.to_vec(),
        };
        let operation = match table {
            RegisterTable::Input => Operation::ReadInput,
            RegisterTable::Holding => Operation::ReadHolding,
        };
        let slave = state.begin(call, operation)?;
        let device = &state.devices[&slave];
        spans
            .iter()
            .map(|&(addr, cnt)| device.table(table).read(addr, cnt))
            .collect()
    }

    async fn write_coil(&mut self, address: Address, value: bool) -> Result<(), BusError> {
        let mut state = self.state();
        let call = BusCall::WriteCoil {
            slave: state.selected_slave(),
            address,
            value,
        };
        let slave = state.begin(call, Operation::WriteCoil)?;
        state
            .devices
            .entry(slave)
            .or_default()
            .bits
            .write(address, &[value])
    }

    async fn write_registers(&mut self, address: Address, words: &[Word]) -> Result<(), BusError> {
        let mut state = self.state();
        let call = BusCall::WriteRegisters {
            slave: state.selected_slave(),
            address,
            words: words.to_vec(),
        };
        let slave = state.begin(call, Operation::WriteRegisters)?;
        state
            .devices
            .entry(slave)
            .or_default()
            .holding_registers
            .write(address, words)
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        let mut state = self.state();
        state.calls.push(BusCall::Disconnect);
        state.selected = None;
        Ok(())
    }
}
