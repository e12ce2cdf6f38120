//! # DMA controller (DMACA) module
//!
//! Single block transfers between a peripheral FIFO and RAM with hardware handshaking.
use arbitrary_int::{u2, u4, u12};
use uc3a3::dmaca::{
    AddressUpdate, BurstSize, ChannelEnable, ConfigHigh, ConfigLow, ControlHigh, ControlLow,
    DmaConfig, MmioChannel, MmioDmacaGlobal, NUM_CHANNELS, TransferFlow, TransferWidth,
};

/// Largest block size in transfer width units.
pub const MAX_BLOCK_TS: usize = 4095;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DmaError {
    #[error("invalid DMA channel {0}")]
    InvalidChannel(usize),
    #[error("invalid handshaking interface {0}")]
    InvalidHandshake(u8),
    #[error("transfer of {0} bytes exceeds maximum block size")]
    TransferTooLarge(usize),
}

/// Width and block size for a transfer of `len` bytes to or from `ram_addr`.
///
/// Word transfers are used if both the address and the length are word aligned.
pub fn transfer_setup(ram_addr: usize, len: usize) -> Result<(TransferWidth, u12), DmaError> {
    let (width, block_ts) = if ram_addr % 4 == 0 && len % 4 == 0 {
        (TransferWidth::Bits32, len / 4)
    } else {
        (TransferWidth::Bits8, len)
    };
    if block_ts > MAX_BLOCK_TS {
        return Err(DmaError::TransferTooLarge(len));
    }
    Ok((width, u12::new(block_ts as u16)))
}

/// Global controller handle.
pub struct Dmaca {
    regs: MmioDmacaGlobal<'static>,
}

impl Dmaca {
    /// Enable the DMA controller.
    pub fn new(mut regs: MmioDmacaGlobal<'static>) -> Self {
        regs.write_dma_cfg(DmaConfig::DEFAULT.with_dma_en(true));
        Self { regs }
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioDmacaGlobal<'static> {
        &mut self.regs
    }

    /// Retrieve a handle to a single channel.
    pub fn channel(&self, channel: usize) -> Result<DmaChannel, DmaError> {
        if channel >= NUM_CHANNELS {
            return Err(DmaError::InvalidChannel(channel));
        }
        Ok(unsafe { DmaChannel::steal(channel) })
    }
}

/// Handle for a single DMA channel.
pub struct DmaChannel {
    channel: usize,
    regs: MmioChannel<'static>,
    global: MmioDmacaGlobal<'static>,
}

impl DmaChannel {
    /// Steal a channel handle.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL. The DMA controller must have been
    /// enabled with [Dmaca::new].
    pub unsafe fn steal(channel: usize) -> Self {
        Self {
            channel,
            regs: unsafe { uc3a3::dmaca::Channel::new_mmio_fixed(channel) },
            global: unsafe { uc3a3::dmaca::DmacaGlobal::new_mmio_fixed() },
        }
    }

    #[inline]
    pub const fn channel(&self) -> usize {
        self.channel
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioChannel<'static> {
        &mut self.regs
    }

    /// Start a transfer from a peripheral FIFO aperture into RAM. The aperture must span at least
    /// `len` bytes.
    ///
    /// # Safety
    ///
    /// `dst` must stay valid for `len` bytes until the transfer is complete.
    pub unsafe fn start_p2m(
        &mut self,
        handshake: u8,
        src_reg: usize,
        dst: *mut u8,
        len: usize,
    ) -> Result<(), DmaError> {
        self.start(
            TransferFlow::PeriphToMem,
            handshake,
            src_reg,
            dst as usize,
            dst as usize,
            len,
        )
    }

    /// Start a transfer from RAM into a peripheral FIFO aperture.
    ///
    /// # Safety
    ///
    /// `src` must stay valid for `len` bytes until the transfer is complete.
    pub unsafe fn start_m2p(
        &mut self,
        handshake: u8,
        src: *const u8,
        dst_reg: usize,
        len: usize,
    ) -> Result<(), DmaError> {
        self.start(
            TransferFlow::MemToPeriph,
            handshake,
            src as usize,
            dst_reg,
            src as usize,
            len,
        )
    }

    fn start(
        &mut self,
        flow: TransferFlow,
        handshake: u8,
        src: usize,
        dst: usize,
        ram_addr: usize,
        len: usize,
    ) -> Result<(), DmaError> {
        if handshake > 0xF {
            return Err(DmaError::InvalidHandshake(handshake));
        }
        let (width, block_ts) = transfer_setup(ram_addr, len)?;
        let p2m = flow == TransferFlow::PeriphToMem;
        self.disable();
        self.clear_interrupts();
        self.regs.write_sar(src as u32);
        self.regs.write_dar(dst as u32);
        self.regs.write_llp(0);
        // The peripheral bus is reached through AHB master 1, RAM through master 2.
        let (sms, dms) = if p2m {
            (u2::new(0), u2::new(1))
        } else {
            (u2::new(1), u2::new(0))
        };
        self.regs.write_ctl_low(
            ControlLow::DEFAULT
                .with_sms(sms)
                .with_dms(dms)
                .with_tt_fc(flow)
                .with_src_msize(BurstSize::Items16)
                .with_dst_msize(BurstSize::Items16)
                .with_sinc(AddressUpdate::Increment)
                .with_dinc(AddressUpdate::Increment)
                .with_src_tr_width(width)
                .with_dst_tr_width(width),
        );
        self.regs
            .write_ctl_high(ControlHigh::DEFAULT.with_block_ts(block_ts));
        self.regs.write_cfg_low(ConfigLow::DEFAULT);
        let handshake = u4::new(handshake);
        self.regs.write_cfg_high(if p2m {
            ConfigHigh::DEFAULT.with_src_per(handshake)
        } else {
            ConfigHigh::DEFAULT.with_dest_per(handshake)
        });
        self.global
            .write_ch_en(ChannelEnable::for_channel(self.channel, true));
        Ok(())
    }

    /// Clear all pending interrupt flags of this channel.
    pub fn clear_interrupts(&mut self) {
        // Transfer, block, source, destination and error clear registers.
        for idx in (0..10).step_by(2) {
            if self.global.write_clear(idx, 1 << self.channel).is_err() {
                log::warn!("DMACA clear register {idx} out of range");
            }
        }
    }

    /// The hardware clears the channel enable bit once the block is transferred.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.global.read_ch_en().ch_en() & (1 << self.channel) == 0
    }

    pub fn disable(&mut self) {
        self.global
            .write_ch_en(ChannelEnable::for_channel(self.channel, false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_transfer() {
        let (width, block_ts) = transfer_setup(0x1000, 512).unwrap();
        assert_eq!(width, TransferWidth::Bits32);
        assert_eq!(block_ts.value(), 128);
    }

    #[test]
    fn byte_transfer_when_unaligned() {
        let (width, block_ts) = transfer_setup(0x1001, 512).unwrap();
        assert_eq!(width, TransferWidth::Bits8);
        assert_eq!(block_ts.value(), 512);
        let (width, block_ts) = transfer_setup(0x1000, 13).unwrap();
        assert_eq!(width, TransferWidth::Bits8);
        assert_eq!(block_ts.value(), 13);
    }

    #[test]
    fn block_too_large() {
        assert_eq!(
            transfer_setup(0x1001, 4096),
            Err(DmaError::TransferTooLarge(4096))
        );
        assert!(transfer_setup(0x1000, 4096 * 4 - 4).is_ok());
    }
}
