//! One polling cycle: a batched read per non-empty access class of every device.
//!
//! Values read from one device are staged and only committed after every class of
//! that device was read, so a failing call never leaves a device half updated.

use crate::bus::{BusClient, RegisterTable};
use crate::codec::WordsCountError;
use crate::error::BusError;
use crate::register::{AccessClass, DataType, Value};
use crate::registry::{Device, Registry};

/// Value read for the register at `index` of the `access_class` set.
type Staged = (AccessClass, usize, Value);

#[derive(Debug)]
pub struct DevicePoll {
    pub device: String,
    /// Number of updated values, or the error that aborted this device's cycle.
    pub result: Result<usize, BusError>,
}

#[derive(Debug, Default)]
pub struct PollReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    pub devices: Vec<DevicePoll>,
}

impl PollReport {
    pub fn is_ok(&self) -> bool {
        self.devices.iter().all(|d| d.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &BusError)> {
        self.devices.iter().filter_map(|d| match &d.result {
            Ok(_) => None,
            Err(err) => Some((d.device.as_str(), err)),
        })
    }
}

/// Read every access class of `device` without touching its stored values.
pub async fn read_device<B>(bus: &mut B, device: &Device) -> Result<Vec<Staged>, BusError>
where
    B: BusClient + ?Sized,
{
    let mut staged = Vec::new();
    let mut selected = false;

    for access_class in AccessClass::ALL {
        let registers = device.registers(access_class);
        let table = RegisterTable::from_access_class(access_class);

        let wanted = registers
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                let readable = match table {
                    None => r.descriptor.datatype == DataType::Bool,
                    Some(_) => r.descriptor.datatype.numeric().is_some(),
                };
                if !readable {
                    // Not decodable from this class: skipped, never an error.
                    tracing::trace!(
                        device = device.name(),
                        %access_class,
                        address = r.descriptor.address,
                        datatype = %r.descriptor.datatype,
                        "Skipping register"
                    );
                }
                readable
            })
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        if wanted.is_empty() {
            continue;
        }
        select(bus, device, &mut selected).await?;

        match table {
            None => {
                let addresses = wanted
                    .iter()
                    .map(|&i| registers[i].descriptor.address)
                    .collect::<Vec<_>>();
                let bits = bus.read_discrete(&addresses).await?;
                check_len(addresses.len(), bits.len())?;

                staged.extend(
                    wanted
                        .iter()
                        .zip(bits)
                        .map(|(&i, bit)| (access_class, i, Value::Bool(bit))),
                );
            }
            Some(table) => {
                let typed = wanted
                    .iter()
                    .filter_map(|&i| Some((i, registers[i].descriptor.datatype.numeric()?)))
                    .collect::<Vec<_>>();
                let spans = typed
                    .iter()
                    .map(|&(i, numeric)| (registers[i].descriptor.address, numeric.word_count()))
                    .collect::<Vec<_>>();
                let words = bus.read_registers(table, &spans).await?;
                check_len(spans.len(), words.len())?;

                for (&(i, numeric), words) in typed.iter().zip(&words) {
                    staged.push((access_class, i, numeric.decode(words)?));
                }
            }
        }
    }

    Ok(staged)
}

async fn select<B>(bus: &mut B, device: &Device, selected: &mut bool) -> Result<(), BusError>
where
    B: BusClient + ?Sized,
{
    if !*selected {
        bus.select_device(device.slave_address()).await?;
        *selected = true;
    }
    Ok(())
}

fn check_len(expected: usize, actual: usize) -> Result<(), WordsCountError> {
    if expected == actual {
        Ok(())
    } else {
        Err(WordsCountError { expected, actual })
    }
}

pub fn commit(device: &mut Device, staged: Vec<Staged>) -> usize {
    let count = staged.len();
    for (access_class, index, value) in staged {
        if let Some(register) = device.registers_mut(access_class).get_mut(index) {
            debug_assert!(value.matches(&register.descriptor.datatype));
            register.value = value;
        }
    }
    count
}

/// Poll the device at `index` of `registry`. On error its values are left unchanged.
pub async fn poll_device<B>(
    bus: &mut B,
    registry: &mut Registry,
    index: usize,
) -> Result<usize, BusError>
where
    B: BusClient + ?Sized,
{
    let Some(device) = registry.device_mut(index) else {
        return Ok(0);
    };
    let staged = read_device(bus, device).await?;
    Ok(commit(device, staged))
}

/// Poll every device in registry order. A failing device does not stop the others.
pub async fn poll_cycle<B>(bus: &mut B, registry: &mut Registry) -> PollReport
where
    B: BusClient + ?Sized,
{
    let mut report = PollReport::default();
    for index in 0..registry.devices().len() {
        let device = registry.devices()[index].name().to_string();
        let result = poll_device(bus, registry, index).await;
        report.devices.push(DevicePoll { device, result });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceDefinition;
    use crate::simulator::{BusCall, Operation, SimulatedBus};

    const D1: &str = "
        read at 0x01 as BOOL discrete
        write at 0x02 as BOOL discrete
        read at 0x10 as U64-WIDE input
        read at 0x0A as F32-WIDE holding
        write at 0x0C as U64-WIDE holding
    ";

    fn registry(definitions: &[(&str, u8, &str)]) -> Registry {
        Registry::build(definitions.iter().map(|&(name, slave_address, source)| {
            DeviceDefinition {
                name: name.to_string(),
                slave_address,
                source: source.to_string(),
            }
        }))
        .unwrap()
    }

    fn values(registry: &Registry, device: &str) -> Vec<Value> {
        registry
            .device(device)
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect()
    }

    fn simulated_d1() -> SimulatedBus {
        let bus = SimulatedBus::new();
        bus.set_bit(7, 0x01, true);
        bus.set_bit(7, 0x02, false);
        bus.set_input(7, 0x10, 42u64);
        bus.set_holding(7, 0x0A, 3.5f32);
        bus.set_holding(7, 0x0C, u64::MAX);
        bus
    }

    #[tokio::test]
    async fn test_poll_decodes_all_classes() {
        let mut registry = registry(&[("D1", 7, D1)]);
        let mut bus = simulated_d1();

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(report.is_ok());
        assert_eq!(
            values(&registry, "D1"),
            vec![
                Value::Bool(true),
                Value::Bool(false),
                Value::U64(42),
                Value::F32(3.5),
                Value::U64(u64::MAX),
            ]
        );
    }

    #[tokio::test]
    async fn test_one_batched_call_per_class() {
        let mut registry = registry(&[("D1", 7, D1)]);
        let mut bus = simulated_d1();

        poll_cycle(&mut bus, &mut registry).await;
        assert_eq!(
            bus.calls(),
            vec![
                BusCall::Select(7),
                BusCall::ReadDiscrete {
                    slave: 7,
                    addresses: vec![0x01, 0x02]
                },
                BusCall::ReadRegisters {
                    slave: 7,
                    table: RegisterTable::Input,
                    spans: vec![(0x10, 4)]
                },
                BusCall::ReadRegisters {
                    slave: 7,
                    table: RegisterTable::Holding,
                    spans: vec![(0x0A, 2), (0x0C, 4)]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_classes_issue_no_calls() {
        let mut registry = registry(&[
            ("D1", 7, "read at 0x0A as F32-WIDE holding"),
            ("empty", 8, ""),
        ]);
        let mut bus = SimulatedBus::new();
        bus.set_holding(7, 0x0A, 1.0f32);

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(report.is_ok());
        assert_eq!(report.devices[1].result.as_ref().unwrap(), &0);
        assert_eq!(
            bus.transactions(),
            vec![BusCall::ReadRegisters {
                slave: 7,
                table: RegisterTable::Holding,
                spans: vec![(0x0A, 2)]
            }]
        );
        assert!(!bus.calls().contains(&BusCall::Select(8)));
    }

    #[tokio::test]
    async fn test_unknown_datatypes_are_skipped() {
        let mut registry = registry(&[(
            "D1",
            7,
            "read at 0x00 as I16 input\n\
             read at 0x01 as BOOL holding\n\
             read at 0x02 as F32-WIDE input",
        )]);
        let mut bus = SimulatedBus::new();
        bus.set_input(7, 0x02, 2.5f32);

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(report.is_ok());
        assert_eq!(
            values(&registry, "D1"),
            vec![Value::Unset, Value::F32(2.5), Value::Unset]
        );
        // The holding set only has a BOOL register: nothing to read.
        assert_eq!(bus.transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_discrete_reads_only_bool_registers() {
        let mut registry = registry(&[
            (
                "D1",
                7,
                "read at 0x01 as BOOL discrete\n\
                 read at 0x05 as F32-WIDE discrete\n\
                 read at 0x06 as I16 discrete",
            ),
            ("D2", 8, "read at 0x00 as U64-WIDE discrete"),
        ]);
        let mut bus = SimulatedBus::new();
        for addr in [0x01, 0x05, 0x06] {
            bus.set_bit(7, addr, true);
        }
        bus.set_bit(8, 0x00, true);

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(report.is_ok());
        assert_eq!(
            values(&registry, "D1"),
            vec![Value::Bool(true), Value::Unset, Value::Unset]
        );
        assert!(registry
            .devices()
            .iter()
            .flat_map(|d| d.iter())
            .all(|r| r.value.matches(&r.descriptor.datatype)));
        assert_eq!(
            bus.calls(),
            vec![
                BusCall::Select(7),
                BusCall::ReadDiscrete {
                    slave: 7,
                    addresses: vec![0x01]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_holding_batch_keeps_device_values() {
        let mut registry = registry(&[("D1", 7, D1)]);
        let mut bus = simulated_d1();
        poll_cycle(&mut bus, &mut registry).await;
        let before = values(&registry, "D1");

        bus.set_bit(7, 0x01, false);
        bus.set_input(7, 0x10, 43u64);
        bus.fail(7, Operation::ReadHolding);

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(!report.is_ok());
        let failures = report.failures().collect::<Vec<_>>();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "D1");
        assert!(matches!(failures[0].1, BusError::Timeout(_)));
        assert_eq!(values(&registry, "D1"), before);

        // The next cycle retries on its own.
        bus.recover(7, Operation::ReadHolding);
        assert!(poll_cycle(&mut bus, &mut registry).await.is_ok());
        assert_eq!(values(&registry, "D1")[0], Value::Bool(false));
        assert_eq!(values(&registry, "D1")[2], Value::U64(43));
    }

    #[tokio::test]
    async fn test_failing_device_does_not_stop_others() {
        let mut registry = registry(&[
            ("D1", 7, D1),
            ("D2", 8, "read at 0x00 as F32-WIDE input"),
        ]);
        let mut bus = simulated_d1();
        bus.set_input(8, 0x00, 9.75f32);
        bus.fail(7, Operation::ReadDiscrete);

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(report.devices[0].result.is_err());
        assert_eq!(report.devices[1].result.as_ref().unwrap(), &1);
        assert_eq!(values(&registry, "D2"), vec![Value::F32(9.75)]);
        assert!(values(&registry, "D1").iter().all(|v| *v == Value::Unset));
        // Aborted after the failing discrete read.
        assert!(!bus.calls().contains(&BusCall::ReadRegisters {
            slave: 7,
            table: RegisterTable::Input,
            spans: vec![(0x10, 4)]
        }));
    }

    #[tokio::test]
    async fn test_invalid_slave_address_fails_device() {
        let mut registry = registry(&[("broadcast", 0, "read at 0x00 as BOOL discrete")]);
        let mut bus = SimulatedBus::new();

        let report = poll_cycle(&mut bus, &mut registry).await;
        assert!(matches!(
            report.devices[0].result,
            Err(BusError::InvalidSlave(0))
        ));
        assert!(bus.transactions().is_empty());
    }
}
