use std::collections::HashSet;

use crate::codec::Address;
use crate::definition::parse_definitions;
use crate::error::ConfigError;
use crate::register::{AccessClass, Action, DataType, Descriptor, Value};

#[derive(Debug, Clone, PartialEq)]
/// A descriptor together with its last known value.
pub struct Register {
    pub descriptor: Descriptor,
    pub value: Value,
}

impl Register {
    fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            value: Value::Unset,
        }
    }
}

#[derive(Debug, Clone)]
/// One physical slave with its discrete, input and holding registers.
pub struct Device {
    name: String,
    slave_address: u8,
    discrete: Vec<Register>,
    input: Vec<Register>,
    holding: Vec<Register>,
}

impl Device {
    /// Partition `descriptors` by access class. Addresses must be unique per class.
    pub fn new(
        name: impl Into<String>,
        slave_address: u8,
        descriptors: Vec<Descriptor>,
    ) -> Result<Self, ConfigError> {
        let mut device = Self {
            name: name.into(),
            slave_address,
            discrete: Vec::new(),
            input: Vec::new(),
            holding: Vec::new(),
        };

        let mut seen = HashSet::new();
        for descriptor in descriptors {
            if !seen.insert((descriptor.access_class, descriptor.address)) {
                return Err(ConfigError::DuplicateAddress {
                    device: device.name,
                    access_class: descriptor.access_class,
                    address: descriptor.address,
                });
            }
            device
                .registers_mut(descriptor.access_class)
                .push(Register::new(descriptor));
        }

        Ok(device)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slave_address(&self) -> u8 {
        self.slave_address
    }

    pub fn registers(&self, access_class: AccessClass) -> &[Register] {
        match access_class {
            AccessClass::Discrete => &self.discrete,
            AccessClass::Input => &self.input,
            AccessClass::Holding => &self.holding,
        }
    }

    pub(crate) fn registers_mut(&mut self, access_class: AccessClass) -> &mut Vec<Register> {
        match access_class {
            AccessClass::Discrete => &mut self.discrete,
            AccessClass::Input => &mut self.input,
            AccessClass::Holding => &mut self.holding,
        }
    }

    /// All registers, discrete first, then input, then holding.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        AccessClass::ALL
            .into_iter()
            .flat_map(move |access_class| self.registers(access_class).iter())
    }

    pub fn find(&self, access_class: AccessClass, address: Address) -> Option<&Register> {
        self.registers(access_class)
            .iter()
            .find(|r| r.descriptor.address == address)
    }

    pub(crate) fn find_mut(
        &mut self,
        access_class: AccessClass,
        address: Address,
    ) -> Option<&mut Register> {
        self.registers_mut(access_class)
            .iter_mut()
            .find(|r| r.descriptor.address == address)
    }
}

#[derive(Debug, Clone)]
/// Input to [`Registry::build`]: one configured device and its definition source.
pub struct DeviceDefinition {
    pub name: String,
    pub slave_address: u8,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
/// Flat projection of one register for presentation.
pub struct Row {
    pub device: String,
    pub slave_address: u8,
    pub address: Address,
    pub action: Action,
    pub datatype: DataType,
    pub access_class: AccessClass,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
/// All devices and the last known value of each of their registers.
///
/// The set of descriptors is fixed at construction; only values change afterwards.
pub struct Registry {
    devices: Vec<Device>,
}

impl Registry {
    /// Parse every definition source and group the descriptors per device, keeping device order.
    ///
    /// Device names must be unique.
    pub fn build<I>(definitions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = DeviceDefinition>,
    {
        let mut names = HashSet::new();
        let devices = definitions
            .into_iter()
            .map(|definition| {
                if !names.insert(definition.name.clone()) {
                    return Err(ConfigError::DuplicateDevice(definition.name));
                }
                let descriptors = parse_definitions(
                    &definition.source,
                    &definition.name,
                    definition.slave_address,
                )
                .map_err(|source| ConfigError::Definition {
                    device: definition.name.clone(),
                    source,
                })?;
                tracing::debug!(
                    device = %definition.name,
                    slave = definition.slave_address,
                    registers = descriptors.len(),
                    "Parsed register definitions"
                );
                Device::new(definition.name, definition.slave_address, descriptors)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn device_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.devices.get_mut(index)
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn register(
        &self,
        device: &str,
        access_class: AccessClass,
        address: Address,
    ) -> Option<&Register> {
        self.device(device)?.find(access_class, address)
    }

    pub(crate) fn register_mut(
        &mut self,
        device: &str,
        access_class: AccessClass,
        address: Address,
    ) -> Option<&mut Register> {
        self.devices
            .iter_mut()
            .find(|d| d.name == device)?
            .find_mut(access_class, address)
    }

    /// Number of registers over all devices.
    pub fn len(&self) -> usize {
        self.devices.iter().map(|d| d.iter().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows(&self) -> Vec<Row> {
        self.devices
            .iter()
            .flat_map(|device| {
                device.iter().map(move |register| Row {
                    device: device.name.clone(),
                    slave_address: device.slave_address,
                    address: register.descriptor.address,
                    action: register.descriptor.action,
                    datatype: register.descriptor.datatype.clone(),
                    access_class: register.descriptor.access_class,
                    value: register.value,
                })
            })
            .collect()
    }
}
