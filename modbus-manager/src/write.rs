use crate::bus::BusClient;
use crate::codec::Address;
use crate::error::{PolicyViolation, WriteError};
use crate::register::{AccessClass, Action, DataType, Descriptor, Value};
use crate::registry::Registry;

/// Check that `descriptor` accepts writes at all.
pub fn check_policy(descriptor: &Descriptor) -> Result<(), PolicyViolation> {
    if descriptor.action != Action::Write {
        return Err(PolicyViolation::ReadOnlyAction);
    }
    match (&descriptor.datatype, descriptor.access_class) {
        (_, AccessClass::Input) => Err(PolicyViolation::InputRegister),
        (DataType::Bool, AccessClass::Discrete) => Ok(()),
        (DataType::Bool, AccessClass::Holding) => Err(PolicyViolation::BoolOutsideDiscrete),
        (DataType::U64Wide | DataType::F32Wide, AccessClass::Holding) => Ok(()),
        (datatype @ (DataType::U64Wide | DataType::F32Wide), AccessClass::Discrete) => {
            Err(PolicyViolation::NumericOutsideHolding(datatype.clone()))
        }
        (datatype @ DataType::Other(_), _) => {
            Err(PolicyViolation::UnsupportedDatatype(datatype.clone()))
        }
    }
}

/// Boolean literals accepted for `BOOL` registers, case-insensitive.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Convert `text` into the value `descriptor` stores, checking the write policy first.
pub fn coerce(descriptor: &Descriptor, text: &str) -> Result<Value, WriteError> {
    check_policy(descriptor)?;

    let text = text.trim();
    let format_error = |reason: String| WriteError::ValueFormat {
        text: text.to_string(),
        datatype: descriptor.datatype.clone(),
        reason,
    };

    match &descriptor.datatype {
        DataType::Bool => parse_bool(text)
            .map(Value::Bool)
            .ok_or_else(|| format_error("expected 'true' or 'false'".to_string())),
        DataType::U64Wide => text
            .parse::<u64>()
            .map(Value::U64)
            .map_err(|err| format_error(err.to_string())),
        DataType::F32Wide => text
            .parse::<f32>()
            .map(Value::F32)
            .map_err(|err| format_error(err.to_string())),
        DataType::Other(_) => {
            Err(PolicyViolation::UnsupportedDatatype(descriptor.datatype.clone()).into())
        }
    }
}

/// Put `value` on the bus at `address` of the selected device: one call.
pub async fn dispatch<B>(bus: &mut B, address: Address, value: Value) -> Result<(), WriteError>
where
    B: BusClient + ?Sized,
{
    match (value, value.to_words()) {
        (Value::Bool(bit), _) => Ok(bus.write_coil(address, bit).await?),
        (_, Some(words)) => Ok(bus.write_registers(address, &words).await?),
        (_, None) => Err(WriteError::NoValue),
    }
}

/// Write `text` to one register and store the written value on success.
///
/// Any rejection or bus failure leaves the stored value untouched.
pub async fn write_register<B>(
    bus: &mut B,
    registry: &mut Registry,
    device: &str,
    access_class: AccessClass,
    address: Address,
    text: &str,
) -> Result<Value, WriteError>
where
    B: BusClient + ?Sized,
{
    let descriptor = registry
        .register(device, access_class, address)
        .map(|r| r.descriptor.clone())
        .ok_or_else(|| PolicyViolation::UnknownRegister {
            device: device.to_string(),
            access_class,
            address,
        })?;

    let value = coerce(&descriptor, text)?;
    debug_assert!(value.matches(&descriptor.datatype));

    bus.select_device(descriptor.slave_address).await?;
    dispatch(bus, descriptor.address, value).await?;

    if let Some(register) = registry.register_mut(device, access_class, address) {
        register.value = value;
    }
    tracing::info!(
        device,
        %access_class,
        address = descriptor.address,
        %value,
        "Register written"
    );
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decode;
    use crate::error::BusError;
    use crate::poll::poll_cycle;
    use crate::registry::DeviceDefinition;
    use crate::simulator::{BusCall, Operation, SimulatedBus};

    const D1: &str = "
        write at 0x01 as BOOL discrete
        read at 0x02 as BOOL discrete
        write at 0x0A as F32-WIDE holding
        write at 0x0C as U64-WIDE holding
        write at 0x10 as U64-WIDE input
        write at 0x20 as I16 holding
        write at 0x21 as BOOL holding
        write at 0x22 as F32-WIDE discrete
    ";

    fn setup() -> (Registry, SimulatedBus) {
        let registry = Registry::build([DeviceDefinition {
            name: "D1".to_string(),
            slave_address: 7,
            source: D1.to_string(),
        }])
        .unwrap();
        let bus = SimulatedBus::from_registry(&registry);
        (registry, bus)
    }

    fn stored(registry: &Registry, access_class: AccessClass, address: Address) -> Value {
        registry.register("D1", access_class, address).unwrap().value
    }

    #[tokio::test]
    async fn test_write_f32() {
        let (mut registry, mut bus) = setup();

        let value = write_register(&mut bus, &mut registry, "D1", AccessClass::Holding, 0x0A, "3.5")
            .await
            .unwrap();
        assert_eq!(value, Value::F32(3.5));
        assert_eq!(stored(&registry, AccessClass::Holding, 0x0A), Value::F32(3.5));
        assert_eq!(
            bus.transactions(),
            vec![BusCall::WriteRegisters {
                slave: 7,
                address: 0x0A,
                words: vec![0x4060, 0x0000]
            }]
        );
    }

    #[tokio::test]
    async fn test_write_bool_and_u64() {
        let (mut registry, mut bus) = setup();

        write_register(&mut bus, &mut registry, "D1", AccessClass::Discrete, 0x01, "TRUE")
            .await
            .unwrap();
        let max = " 18446744073709551615 ";
        write_register(&mut bus, &mut registry, "D1", AccessClass::Holding, 0x0C, max)
            .await
            .unwrap();

        assert_eq!(stored(&registry, AccessClass::Discrete, 0x01), Value::Bool(true));
        assert_eq!(stored(&registry, AccessClass::Holding, 0x0C), Value::U64(u64::MAX));
        assert_eq!(
            bus.transactions()[0],
            BusCall::WriteCoil {
                slave: 7,
                address: 0x01,
                value: true
            }
        );
    }

    #[tokio::test]
    async fn test_written_values_read_back() {
        let (mut registry, mut bus) = setup();

        for (access_class, address, text) in [
            (AccessClass::Discrete, 0x01, "1"),
            (AccessClass::Holding, 0x0A, "-0.15625"),
            (AccessClass::Holding, 0x0C, "1234567890123"),
        ] {
            let written = write_register(&mut bus, &mut registry, "D1", access_class, address, text)
                .await
                .unwrap();
            poll_cycle(&mut bus, &mut registry).await;
            assert_eq!(stored(&registry, access_class, address), written);
        }

        let device = bus.device(7).unwrap();
        let words = device.holding_registers.read(0x0C, 4).unwrap();
        assert_eq!(u64::from_be_words(&words).unwrap(), 1234567890123);
    }

    #[tokio::test]
    async fn test_unparsable_text_never_reaches_bus() {
        let (mut registry, mut bus) = setup();

        for (access_class, address, text) in [
            (AccessClass::Discrete, 0x01, "yes"),
            (AccessClass::Holding, 0x0A, "3,5"),
            (AccessClass::Holding, 0x0C, "-1"),
            (AccessClass::Holding, 0x0C, "1.5"),
        ] {
            let err = write_register(&mut bus, &mut registry, "D1", access_class, address, text)
                .await
                .unwrap_err();
            assert!(matches!(err, WriteError::ValueFormat { .. }), "{text}: {err}");
            assert_eq!(stored(&registry, access_class, address), Value::Unset);
        }
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn test_write_policy() {
        let (mut registry, mut bus) = setup();

        for (access_class, address, expected) in [
            (AccessClass::Discrete, 0x02, PolicyViolation::ReadOnlyAction),
            (AccessClass::Input, 0x10, PolicyViolation::InputRegister),
            (
                AccessClass::Holding,
                0x20,
                PolicyViolation::UnsupportedDatatype(DataType::Other("I16".to_string())),
            ),
            (AccessClass::Holding, 0x21, PolicyViolation::BoolOutsideDiscrete),
            (
                AccessClass::Discrete,
                0x22,
                PolicyViolation::NumericOutsideHolding(DataType::F32Wide),
            ),
            (
                AccessClass::Holding,
                0x99,
                PolicyViolation::UnknownRegister {
                    device: "D1".to_string(),
                    access_class: AccessClass::Holding,
                    address: 0x99,
                },
            ),
        ] {
            let err = write_register(&mut bus, &mut registry, "D1", access_class, address, "1")
                .await
                .unwrap_err();
            match err {
                WriteError::Policy(violation) => assert_eq!(violation, expected),
                other => panic!("unexpected error {other:?}"),
            }
        }
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bus_failure_keeps_stored_value() {
        let (mut registry, mut bus) = setup();
        write_register(&mut bus, &mut registry, "D1", AccessClass::Holding, 0x0A, "1.5")
            .await
            .unwrap();

        bus.fail(7, Operation::WriteRegisters);
        let err = write_register(&mut bus, &mut registry, "D1", AccessClass::Holding, 0x0A, "2.5")
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Bus(BusError::Timeout(_))));
        assert_eq!(stored(&registry, AccessClass::Holding, 0x0A), Value::F32(1.5));
    }

    #[tokio::test]
    async fn test_dispatch_unset_is_refused() {
        let (_, mut bus) = setup();
        bus.select_device(7).await.unwrap();

        let err = dispatch(&mut bus, 0x0A, Value::Unset).await.unwrap_err();
        assert!(matches!(err, WriteError::NoValue));
        assert!(bus.transactions().is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("on"), None);
    }
}
