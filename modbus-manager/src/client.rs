//! [`BusClient`] over a real Modbus TCP or RTU connection, based on `tokio-modbus`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};

use crate::bus::{split_into_blocks, validate_slave, BlockConfig, BusClient, RegisterTable};
use crate::codec::{Address, Quantity, Word, WordsCountError};
use crate::config::{DiscreteTable, SerialConfig};
use crate::error::BusError;

/// Maximum number of bits in one read coils / read discrete inputs request.
const MAX_BITS_PER_REQUEST: Quantity = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where the bus lives, parsed from the configured url.
pub enum Endpoint {
    Tcp(String),
    Rtu(String),
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, BusError> {
        let endpoint = if let Some(host) = url.strip_prefix("tcp://") {
            Endpoint::Tcp(host.to_string())
        } else if let Some(path) = url.strip_prefix("rtu://") {
            Endpoint::Rtu(path.to_string())
        } else if url.starts_with('/') || url.starts_with("COM") {
            Endpoint::Rtu(url.to_string())
        } else if url.contains(':') {
            Endpoint::Tcp(url.to_string())
        } else {
            return Err(BusError::InvalidUrl(url.to_string()));
        };

        match &endpoint {
            Endpoint::Tcp(s) | Endpoint::Rtu(s) if s.is_empty() => {
                Err(BusError::InvalidUrl(url.to_string()))
            }
            _ => Ok(endpoint),
        }
    }
}

/// Modbus client connection owned by the engine.
pub struct ModbusBus {
    ctx: Context,
    timeout: Duration,
    block_config: BlockConfig,
    discrete_table: DiscreteTable,
}

impl ModbusBus {
    pub fn new(ctx: Context, config: &SerialConfig) -> Self {
        Self {
            ctx,
            timeout: config.timeout(),
            block_config: config.block_config(),
            discrete_table: config.discrete_table,
        }
    }

    /// Open the connection described by `config`.
    pub async fn open(config: &SerialConfig) -> Result<Self, BusError> {
        let ctx = match Endpoint::parse(&config.url)? {
            Endpoint::Tcp(host) => connect_tcp(&host, config.timeout()).await?,
            Endpoint::Rtu(path) => attach_rtu(&path, config)?,
        };
        tracing::info!(url = %config.url, timeout = ?config.timeout(), "Opened Modbus connection");
        Ok(Self::new(ctx, config))
    }

    fn bit_block_config(&self) -> BlockConfig {
        BlockConfig {
            max_cnt_per_request: MAX_BITS_PER_REQUEST,
            allow_register_gaps: self.block_config.allow_register_gaps,
        }
    }
}

async fn connect_tcp(host: &str, timeout: Duration) -> Result<Context, BusError> {
    let connect_err = |source| BusError::Connect {
        url: host.to_string(),
        source,
    };
    let socket_addr = tokio::net::lookup_host(host)
        .await
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| BusError::InvalidUrl(host.to_string()))?;

    tokio::time::timeout(timeout, tokio_modbus::client::tcp::connect(socket_addr))
        .await
        .map_err(|_| BusError::Timeout(timeout))?
        .map_err(connect_err)
}

#[cfg(feature = "serial")]
fn attach_rtu(path: &str, config: &SerialConfig) -> Result<Context, BusError> {
    use tokio_serial::{DataBits, Parity, StopBits};

    let data_bits = match config.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let parity = match config.parity {
        1 => Parity::Even,
        2 => Parity::Odd,
        _ => Parity::None,
    };
    let stop_bits = match config.stop_bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    };

    let builder = tokio_serial::new(path, config.speed)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .timeout(config.timeout());
    let serial_stream =
        tokio_serial::SerialStream::open(&builder).map_err(|err| BusError::Connect {
            url: path.to_string(),
            source: err.into(),
        })?;

    Ok(tokio_modbus::client::rtu::attach(serial_stream))
}

#[cfg(not(feature = "serial"))]
fn attach_rtu(path: &str, _config: &SerialConfig) -> Result<Context, BusError> {
    Err(BusError::InvalidUrl(format!(
        "{path} (built without the `serial` feature)"
    )))
}

/// Bound a tokio-modbus call by `timeout` and flatten its nested result.
async fn call<T, F>(timeout: Duration, request: F) -> Result<T, BusError>
where
    F: Future<Output = tokio_modbus::Result<T>>,
{
    match tokio::time::timeout(timeout, request).await {
        Err(_) => Err(BusError::Timeout(timeout)),
        Ok(result) => flatten(result),
    }
}

fn flatten<T>(result: tokio_modbus::Result<T>) -> Result<T, BusError> {
    match result {
        Err(err) => Err(BusError::Transport(err.to_string())),
        Ok(Err(exc)) => Err(BusError::Exception(format!("{exc:?}"))),
        Ok(Ok(value)) => Ok(value),
    }
}

/// Take `cnt` items at `addr` out of a block read starting at `start`.
fn slice_block<T: Copy>(
    data: &[T],
    start: Address,
    addr: Address,
    cnt: Quantity,
) -> Result<Vec<T>, WordsCountError> {
    let offset = usize::from(addr - start);
    data.get(offset..offset + usize::from(cnt))
        .map(<[T]>::to_vec)
        .ok_or(WordsCountError {
            expected: offset + usize::from(cnt),
            actual: data.len(),
        })
}

#[async_trait]
impl BusClient for ModbusBus {
    async fn select_device(&mut self, slave_address: u8) -> Result<(), BusError> {
        validate_slave(slave_address)?;
        self.ctx.set_slave(Slave(slave_address));
        Ok(())
    }

    async fn read_discrete(&mut self, addresses: &[Address]) -> Result<Vec<bool>, BusError> {
        let spans = addresses.iter().map(|&addr| (addr, 1)).collect::<Vec<_>>();
        let mut bits = vec![false; addresses.len()];

        for block in split_into_blocks(&spans, &self.bit_block_config()) {
            let data = match self.discrete_table {
                DiscreteTable::DiscreteInputs => {
                    call(self.timeout, self.ctx.read_discrete_inputs(block.start, block.cnt)).await?
                }
                DiscreteTable::Coils => {
                    call(self.timeout, self.ctx.read_coils(block.start, block.cnt)).await?
                }
            };
            for i in block.members {
                bits[i] = slice_block(&data, block.start, addresses[i], 1)?[0];
            }
        }

        Ok(bits)
    }

    async fn read_registers(
        &mut self,
        table: RegisterTable,
        spans: &[(Address, Quantity)],
    ) -> Result<Vec<Vec<Word>>, BusError> {
        let mut values = vec![Vec::new(); spans.len()];

        for block in split_into_blocks(spans, &self.block_config) {
            tracing::trace!(?table, start = block.start, cnt = block.cnt, "Reading block");
            let words = match table {
                RegisterTable::Input => {
                    call(self.timeout, self.ctx.read_input_registers(block.start, block.cnt)).await?
                }
                RegisterTable::Holding => {
                    call(self.timeout, self.ctx.read_holding_registers(block.start, block.cnt))
                        .await?
                }
            };
            for i in block.members {
                let (addr, cnt) = spans[i];
                values[i] = slice_block(&words, block.start, addr, cnt)?;
            }
        }

        Ok(values)
    }

    async fn write_coil(&mut self, address: Address, value: bool) -> Result<(), BusError> {
        call(self.timeout, self.ctx.write_single_coil(address, value)).await
    }

    async fn write_registers(&mut self, address: Address, words: &[Word]) -> Result<(), BusError> {
        match words {
            [word] => call(self.timeout, self.ctx.write_single_register(address, *word)).await,
            _ => call(self.timeout, self.ctx.write_multiple_registers(address, words)).await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        flatten(self.ctx.disconnect().await)
    }
}
