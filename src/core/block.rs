use log::trace;

use crate::{
    common::commands::*,
    core::MmcHost,
    host::{MmcHostOps, SdhciError, SdhciResult},
};

impl<T: MmcHostOps> MmcHost<T> {
    fn card_addr(&self, block_id: u32) -> SdhciResult<u32> {
        if self.is_high_capacity() {
            Ok(block_id)
        } else {
            block_id
                .checked_mul(MMC_MAX_BLOCK_LEN)
                .ok_or(SdhciError::InvalidArgument)
        }
    }

    /// Blocks covered by `len` bytes starting at `block_id`. The last block
    /// must be addressable.
    fn block_count(&self, block_id: u32, len: usize) -> SdhciResult<u32> {
        let block_len = MMC_MAX_BLOCK_LEN as usize;
        if len == 0 || len % block_len != 0 {
            return Err(SdhciError::InvalidArgument);
        }
        let blocks = u32::try_from(len / block_len).map_err(|_| SdhciError::InvalidArgument)?;
        let last = block_id
            .checked_add(blocks - 1)
            .ok_or(SdhciError::InvalidArgument)?;
        self.card_addr(last)?;
        Ok(blocks)
    }

    fn piece_len(max_blocks: u32) -> usize {
        (max_blocks.max(1) as usize).saturating_mul(MMC_MAX_BLOCK_LEN as usize)
    }

    /// Read `buffer.len() / 512` blocks starting at `block_id`.
    pub fn read_blocks(&self, block_id: u32, buffer: &mut [u8]) -> SdhciResult {
        let total = self.block_count(block_id, buffer.len())?;
        trace!("read_blocks: block_id = {}, blocks = {}", block_id, total);

        self.with_host(|ops| {
            let mut done = 0;
            for piece in buffer.chunks_mut(Self::piece_len(ops.max_block_count())) {
                let blocks = (piece.len() / MMC_MAX_BLOCK_LEN as usize) as u32;
                let addr = self.card_addr(block_id + done)?;
                let data = MmcData::read(MMC_MAX_BLOCK_LEN, blocks, piece);

                if blocks == 1 {
                    let mut cmd = MmcCommand::new(MMC_READ_SINGLE_BLOCK, addr, ResponseType::R1);
                    ops.send_cmd(&mut cmd, Some(data))?;
                } else {
                    let mut cmd =
                        MmcCommand::new(MMC_READ_MULTIPLE_BLOCK, addr, ResponseType::R1);
                    ops.send_cmd(&mut cmd, Some(data))?;
                    // Open-ended multi-block reads end with a stop.
                    let mut stop = MmcCommand::new(MMC_STOP_TRANSMISSION, 0, ResponseType::R1b);
                    ops.send_cmd(&mut stop, None)?;
                }
                done += blocks;
            }
            Ok(())
        })
    }

    /// Write `buffer.len() / 512` blocks starting at `block_id`.
    pub fn write_blocks(&self, block_id: u32, buffer: &[u8]) -> SdhciResult {
        let total = self.block_count(block_id, buffer.len())?;
        trace!("write_blocks: block_id = {}, blocks = {}", block_id, total);

        self.with_host(|ops| {
            let mut done = 0;
            for piece in buffer.chunks(Self::piece_len(ops.max_block_count())) {
                let blocks = (piece.len() / MMC_MAX_BLOCK_LEN as usize) as u32;
                let addr = self.card_addr(block_id + done)?;
                let data = MmcData::write(MMC_MAX_BLOCK_LEN, blocks, piece);

                if blocks == 1 {
                    let mut cmd = MmcCommand::new(MMC_WRITE_BLOCK, addr, ResponseType::R1);
                    ops.send_cmd(&mut cmd, Some(data))?;
                } else {
                    let mut cmd =
                        MmcCommand::new(MMC_WRITE_MULTIPLE_BLOCK, addr, ResponseType::R1);
                    ops.send_cmd(&mut cmd, Some(data))?;
                    let mut stop = MmcCommand::new(MMC_STOP_TRANSMISSION, 0, ResponseType::R1b);
                    ops.send_cmd(&mut stop, None)?;
                }
                done += blocks;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::common::config::HostConfig;
    use crate::host::w3k::W3kSdhci;
    use crate::mock::MockController;

    fn host(
        config: HostConfig,
    ) -> (MmcHost<W3kSdhci<MockController, MockController>>, MockController) {
        let mock = MockController::new();
        let sdhci = W3kSdhci::probe(mock.clone(), mock.clone(), config).unwrap();
        mock.reset_log();
        (MmcHost::new("emmc0".to_string(), sdhci), mock)
    }

    #[test]
    fn single_block_uses_single_block_commands() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        let data = [0x42u8; 512];
        host.write_blocks(7, &data).unwrap();
        let mut back = [0u8; 512];
        host.read_blocks(7, &mut back).unwrap();
        assert_eq!(back, data);

        let opcodes: Vec<u8> = mock.commands().iter().map(|c| c.opcode).collect();
        assert_eq!(opcodes, [MMC_WRITE_BLOCK, MMC_READ_SINGLE_BLOCK]);
    }

    #[test]
    fn multi_block_ends_with_stop() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        let data: Vec<u8> = (0..4 * 512).map(|i| (i / 512) as u8 + 1).collect();
        host.write_blocks(20, &data).unwrap();

        let trace: Vec<(u8, u32)> = mock.commands().iter().map(|c| (c.opcode, c.arg)).collect();
        assert_eq!(
            trace,
            [(MMC_WRITE_MULTIPLE_BLOCK, 20), (MMC_STOP_TRANSMISSION, 0)]
        );
        assert_eq!(mock.card_block(23)[0], 4);
    }

    #[test]
    fn requests_split_at_max_block_count() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        mock.fill_card(|block, _| block as u8);

        let mut buf = vec![0u8; 600 * 512];
        host.read_blocks(0, &mut buf).unwrap();

        let reads: Vec<(u32, u32)> = mock
            .commands()
            .iter()
            .filter(|c| c.opcode == MMC_READ_MULTIPLE_BLOCK)
            .map(|c| (c.arg, c.blocks))
            .collect();
        // 512 blocks exceed two chunks of 64 and get split by the host;
        // the 88-block remainder goes out whole.
        assert_eq!(reads.first(), Some(&(0, 64)));
        assert_eq!(reads.last(), Some(&(512, 88)));
        assert_eq!(buf[599 * 512], (599 % 256) as u8);
    }

    #[test]
    fn byte_addressed_cards_get_byte_offsets() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        let host = host.with_high_capacity(false);
        mock.set_byte_addressed(true);
        mock.fill_card(|block, _| block as u8);

        let mut buf = [0u8; 512];
        host.read_blocks(3, &mut buf).unwrap();
        assert_eq!(mock.commands()[0].arg, 3 * 512);
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn byte_addressed_large_read_hits_the_right_sectors() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        let host = host.with_high_capacity(false);
        mock.set_byte_addressed(true);
        mock.fill_card(|block, i| (block as u8) ^ (i as u8));

        let mut buf = vec![0u8; 200 * 512];
        host.read_blocks(0, &mut buf).unwrap();

        let reads: Vec<u32> = mock
            .commands()
            .iter()
            .filter(|c| c.opcode == MMC_READ_MULTIPLE_BLOCK)
            .map(|c| c.arg)
            .collect();
        assert_eq!(reads, [0, 64 * 512, 128 * 512]);
        for block in 0..200usize {
            assert_eq!(buf[block * 512 + 1], (block as u8) ^ 1);
        }
    }

    #[test]
    fn out_of_range_addresses_are_rejected() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        let mut buf = vec![0u8; 1024];
        assert_eq!(
            host.read_blocks(u32::MAX, &mut buf),
            Err(SdhciError::InvalidArgument)
        );

        let host = host.with_high_capacity(false);
        assert_eq!(
            host.write_blocks(0x80_0000, &buf),
            Err(SdhciError::InvalidArgument)
        );
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn partial_blocks_are_rejected() {
        let (host, mock) = host(HostConfig::new(0x1000, 50_000_000));
        let mut buf = [0u8; 700];
        assert_eq!(
            host.read_blocks(0, &mut buf),
            Err(SdhciError::InvalidArgument)
        );
        assert_eq!(host.write_blocks(0, &[]), Err(SdhciError::InvalidArgument));
        assert!(mock.commands().is_empty());
    }
}
