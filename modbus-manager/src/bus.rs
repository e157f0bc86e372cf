use async_trait::async_trait;

use crate::codec::{Address, Quantity, Word};
use crate::error::BusError;
use crate::register::AccessClass;

/// Highest unicast slave address on a Modbus serial line.
pub const MAX_SLAVE_ADDRESS: u8 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// 16-bit register tables addressed by [`BusClient::read_registers`].
pub enum RegisterTable {
    Input,
    Holding,
}

impl RegisterTable {
    pub fn from_access_class(access_class: AccessClass) -> Option<Self> {
        match access_class {
            AccessClass::Input => Some(RegisterTable::Input),
            AccessClass::Holding => Some(RegisterTable::Holding),
            AccessClass::Discrete => None,
        }
    }
}

#[async_trait]
/// Narrow interface the engine drives the fieldbus through.
///
/// Every call is bounded by the implementation's timeout. Each `read_*` call is one
/// batched call from the engine's point of view, whatever number of requests the
/// implementation needs on the wire.
pub trait BusClient: Send {
    /// Address all following calls to `slave_address`.
    async fn select_device(&mut self, slave_address: u8) -> Result<(), BusError>;

    /// Read one bit per address, in the order of `addresses`.
    async fn read_discrete(&mut self, addresses: &[Address]) -> Result<Vec<bool>, BusError>;

    /// Read `count` words at each `(address, count)` span, in the order of `spans`.
    async fn read_registers(
        &mut self,
        table: RegisterTable,
        spans: &[(Address, Quantity)],
    ) -> Result<Vec<Vec<Word>>, BusError>;

    async fn write_coil(&mut self, address: Address, value: bool) -> Result<(), BusError>;

    /// Write consecutive holding registers starting at `address`.
    async fn write_registers(&mut self, address: Address, words: &[Word]) -> Result<(), BusError>;

    async fn disconnect(&mut self) -> Result<(), BusError>;
}

pub fn validate_slave(slave_address: u8) -> Result<(), BusError> {
    if slave_address == 0 || slave_address > MAX_SLAVE_ADDRESS {
        return Err(BusError::InvalidSlave(slave_address));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
/// Limits used to pack requested spans into wire requests.
pub struct BlockConfig {
    /// Maximum number of registers (or bits) in a single request.
    pub max_cnt_per_request: Quantity,
    /// Allow a block to cover unrequested addresses between requested spans.
    pub allow_register_gaps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One wire request covering `[start, start + cnt)` and the spans it serves.
pub struct Block {
    pub start: Address,
    pub cnt: Quantity,
    /// Indices into the span slice given to [`split_into_blocks`].
    pub members: Vec<usize>,
}

/// Pack `spans` into as few requests as `config` allows.
pub fn split_into_blocks(spans: &[(Address, Quantity)], config: &BlockConfig) -> Vec<Block> {
    let mut order = (0..spans.len()).collect::<Vec<_>>();
    order.sort_by_key(|&i| spans[i].0);

    let end_of = |i: usize| u32::from(spans[i].0) + u32::from(spans[i].1);

    let mut blocks = Vec::new();
    let mut current: Option<(u32, u32, Vec<usize>)> = None;

    for i in order {
        let addr = u32::from(spans[i].0);
        let end = end_of(i);
        current = match current.take() {
            None => Some((addr, end, vec![i])),
            Some((start, block_end, mut members)) => {
                let max_cond =
                    end.max(block_end) - start <= u32::from(config.max_cnt_per_request);
                let gap_cond = addr <= block_end;

                if max_cond && (gap_cond || config.allow_register_gaps) {
                    members.push(i);
                    Some((start, end.max(block_end), members))
                } else {
                    blocks.push(to_block(start, block_end, members));
                    Some((addr, end, vec![i]))
                }
            }
        };
    }

    if let Some((start, block_end, members)) = current {
        blocks.push(to_block(start, block_end, members));
    }

    blocks
}

fn to_block(start: u32, end: u32, members: Vec<usize>) -> Block {
    Block {
        start: start as Address,
        cnt: (end - start) as Quantity,
        members,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_blocks() {
        let spans = [0, 4, 8, 10].map(|addr| (addr, 2));

        for (allow_register_gaps, expected) in [(true, vec![2, 2]), (false, vec![1, 1, 2])] {
            let config = BlockConfig {
                max_cnt_per_request: 8,
                allow_register_gaps,
            };
            let result = split_into_blocks(&spans, &config)
                .iter()
                .map(|b| b.members.len())
                .collect::<Vec<_>>();
            assert_eq!(result, expected)
        }
    }

    #[test]
    fn test_split_keeps_span_indices() {
        let spans = [(10, 2), (0, 4), (4, 2)];
        let config = BlockConfig {
            max_cnt_per_request: 123,
            allow_register_gaps: false,
        };
        let blocks = split_into_blocks(&spans, &config);
        assert_eq!(
            blocks,
            vec![
                Block {
                    start: 0,
                    cnt: 6,
                    members: vec![1, 2]
                },
                Block {
                    start: 10,
                    cnt: 2,
                    members: vec![0]
                },
            ]
        );
    }

    #[test]
    fn test_split_overlapping_spans() {
        let spans = [(0, 4), (2, 2)];
        let config = BlockConfig {
            max_cnt_per_request: 123,
            allow_register_gaps: false,
        };
        let blocks = split_into_blocks(&spans, &config);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].cnt, 4);
    }

    #[test]
    fn test_split_at_top_of_address_space() {
        let spans = [(0xFFFE, 2)];
        let config = BlockConfig {
            max_cnt_per_request: 123,
            allow_register_gaps: true,
        };
        let blocks = split_into_blocks(&spans, &config);
        assert_eq!(blocks[0].start, 0xFFFE);
        assert_eq!(blocks[0].cnt, 2);
    }

    #[test]
    fn test_split_empty() {
        let config = BlockConfig {
            max_cnt_per_request: 123,
            allow_register_gaps: true,
        };
        assert!(split_into_blocks(&[], &config).is_empty());
    }

    #[test]
    fn test_validate_slave() {
        assert!(validate_slave(1).is_ok());
        assert!(validate_slave(247).is_ok());
        assert!(matches!(validate_slave(0), Err(BusError::InvalidSlave(0))));
        assert!(matches!(validate_slave(248), Err(BusError::InvalidSlave(248))));
    }
}
