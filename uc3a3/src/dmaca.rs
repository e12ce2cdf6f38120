//! DMA controller (DMACA) register module.
//!
//! The controller has one register block per channel with a stride of [CHANNEL_STRIDE] and a
//! global block for the interrupt, configuration and channel enable registers.
use arbitrary_int::{u2, u3, u4, u10, u12};

pub const DMACA_BASE: usize = 0xFF10_0000;
pub const CHANNEL_STRIDE: usize = 0x58;
pub const NUM_CHANNELS: usize = 8;
pub const GLOBAL_OFFSET: usize = 0x2C0;

/// Hardware handshaking interface of the MCI receive direction.
pub const HANDSHAKE_MCI_RX: u8 = 0;
/// Hardware handshaking interface of the MCI transmit direction.
pub const HANDSHAKE_MCI_TX: u8 = 1;

#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum TransferWidth {
    Bits8 = 0,
    Bits16 = 1,
    Bits32 = 2,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum AddressUpdate {
    Increment = 0,
    Decrement = 1,
    NoChange = 2,
    NoChangeAlt = 3,
}

#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum BurstSize {
    Items1 = 0,
    Items4 = 1,
    Items8 = 2,
    Items16 = 3,
    Items32 = 4,
}

/// Transfer type and flow controller.
#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum TransferFlow {
    MemToMem = 0,
    MemToPeriph = 1,
    PeriphToMem = 2,
    PeriphToPeriph = 3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ControlLow {
    #[bit(28, rw)]
    llp_src_en: bool,
    #[bit(27, rw)]
    llp_dst_en: bool,
    /// Source AHB master.
    #[bits(25..=26, rw)]
    sms: u2,
    /// Destination AHB master.
    #[bits(23..=24, rw)]
    dms: u2,
    #[bits(20..=22, rw)]
    tt_fc: Option<TransferFlow>,
    #[bit(18, rw)]
    dst_scatter_en: bool,
    #[bit(17, rw)]
    src_gather_en: bool,
    #[bits(14..=16, rw)]
    src_msize: Option<BurstSize>,
    #[bits(11..=13, rw)]
    dst_msize: Option<BurstSize>,
    #[bits(9..=10, rw)]
    sinc: AddressUpdate,
    #[bits(7..=8, rw)]
    dinc: AddressUpdate,
    #[bits(4..=6, rw)]
    src_tr_width: Option<TransferWidth>,
    #[bits(1..=3, rw)]
    dst_tr_width: Option<TransferWidth>,
    #[bit(0, rw)]
    int_en: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ControlHigh {
    #[bit(12, rw)]
    done: bool,
    /// Block transfer size in units of the source transfer width.
    #[bits(0..=11, rw)]
    block_ts: u12,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ConfigLow {
    #[bit(31, rw)]
    reload_dst: bool,
    #[bit(30, rw)]
    reload_src: bool,
    #[bits(20..=29, rw)]
    max_abrst: u10,
    #[bit(19, rw)]
    src_hs_pol: bool,
    #[bit(18, rw)]
    dst_hs_pol: bool,
    #[bit(17, rw)]
    lock_b: bool,
    #[bit(16, rw)]
    lock_ch: bool,
    /// Source software handshaking when set, hardware handshaking when cleared.
    #[bit(11, rw)]
    hs_sel_src: bool,
    /// Destination software handshaking when set, hardware handshaking when cleared.
    #[bit(10, rw)]
    hs_sel_dst: bool,
    #[bit(9, r)]
    fifo_empty: bool,
    #[bit(8, rw)]
    ch_susp: bool,
    #[bits(5..=7, rw)]
    ch_prior: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ConfigHigh {
    /// Destination hardware handshaking interface.
    #[bits(11..=14, rw)]
    dest_per: u4,
    /// Source hardware handshaking interface.
    #[bits(7..=10, rw)]
    src_per: u4,
    #[bit(6, rw)]
    ss_upd_en: bool,
    #[bit(5, rw)]
    ds_upd_en: bool,
    #[bits(2..=4, rw)]
    protctl: u3,
    #[bit(1, rw)]
    fifo_mode: bool,
    #[bit(0, rw)]
    fcmode: bool,
}

/// Register block of a single DMA channel.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Channel {
    /// Source address.
    sar: u32,
    _reserved_0: u32,
    /// Destination address.
    dar: u32,
    _reserved_1: u32,
    /// Linked list pointer.
    llp: u32,
    _reserved_2: u32,
    ctl_low: ControlLow,
    ctl_high: ControlHigh,
    sstat: u32,
    _reserved_3: u32,
    dstat: u32,
    _reserved_4: u32,
    sstatar: u32,
    _reserved_5: u32,
    dstatar: u32,
    _reserved_6: u32,
    cfg_low: ConfigLow,
    cfg_high: ConfigHigh,
    /// Source gather register.
    sgr: u32,
    _reserved_7: u32,
    /// Destination scatter register.
    dsr: u32,
    _reserved_8: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Channel>(), CHANNEL_STRIDE);

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DmaConfig {
    #[bit(0, rw)]
    dma_en: bool,
}

/// Channel enable register. A channel bit is only written when its write enable bit is set.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct ChannelEnable {
    #[bits(8..=15, w)]
    ch_en_we: u8,
    #[bits(0..=7, rw)]
    ch_en: u8,
}

impl ChannelEnable {
    /// Enable or disable a single channel without touching the others.
    #[inline]
    pub const fn for_channel(channel: usize, enable: bool) -> Self {
        let mask = 1u8 << (channel % NUM_CHANNELS);
        Self::DEFAULT
            .with_ch_en_we(mask)
            .with_ch_en(if enable { mask } else { 0 })
    }
}

/// Global registers, starting at [GLOBAL_OFFSET].
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct DmacaGlobal {
    /// Raw interrupt status registers (transfer, block, source, destination, error).
    #[mmio(PureRead)]
    raw: [u32; 10],
    #[mmio(PureRead)]
    status: [u32; 10],
    mask: [u32; 10],
    #[mmio(Write)]
    clear: [u32; 10],
    #[mmio(PureRead)]
    status_int: u32,
    _reserved_0: u32,
    req_src: u32,
    _reserved_1: u32,
    req_dst: u32,
    _reserved_2: u32,
    sgl_req_src: u32,
    _reserved_3: u32,
    sgl_req_dst: u32,
    _reserved_4: u32,
    lst_src: u32,
    _reserved_5: u32,
    lst_dst: u32,
    _reserved_6: u32,
    dma_cfg: DmaConfig,
    _reserved_7: u32,
    ch_en: ChannelEnable,
    _reserved_8: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<DmacaGlobal>(), 0xE8);

impl Channel {
    /// Create a MMIO handle for the given DMA channel. Channel indices wrap at [NUM_CHANNELS].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed(channel: usize) -> MmioChannel<'static> {
        unsafe { Self::new_mmio_at(DMACA_BASE + (channel % NUM_CHANNELS) * CHANNEL_STRIDE) }
    }
}

impl DmacaGlobal {
    /// Create a MMIO handle for the global DMACA registers.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioDmacaGlobal<'static> {
        unsafe { Self::new_mmio_at(DMACA_BASE + GLOBAL_OFFSET) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_enable_mask() {
        assert_eq!(ChannelEnable::for_channel(0, true).raw_value(), 0x0101);
        assert_eq!(ChannelEnable::for_channel(3, true).raw_value(), 0x0808);
        assert_eq!(ChannelEnable::for_channel(3, false).raw_value(), 0x0800);
    }
}
