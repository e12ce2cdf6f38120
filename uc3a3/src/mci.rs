//! Multimedia card interface (MCI) register module.
use arbitrary_int::{u2, u3, u4, u6};

pub const MCI_BASE: usize = 0xFFFE_4000;
/// Offset of the FIFO aperture used as DMA source and destination.
pub const FIFO_OFFSET: usize = 0x200;
pub const FIFO_ADDR: usize = MCI_BASE + FIFO_OFFSET;

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct Control {
    #[bit(7, w)]
    swrst: bool,
    /// Power save mode disable.
    #[bit(3, w)]
    pws_dis: bool,
    /// Power save mode enable.
    #[bit(2, w)]
    pws_en: bool,
    #[bit(1, w)]
    mci_dis: bool,
    #[bit(0, w)]
    mci_en: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Mode {
    /// Add one half cycle to the clock divider.
    #[bit(16, rw)]
    clkodd: bool,
    /// Padding value used when the transfer length is not a multiple of four.
    #[bit(14, rw)]
    padv: bool,
    /// Force byte transfers.
    #[bit(13, rw)]
    fbyte: bool,
    /// Stop the clock while the FIFO is full on writes.
    #[bit(12, rw)]
    wrproof: bool,
    /// Stop the clock while the FIFO is full on reads.
    #[bit(11, rw)]
    rdproof: bool,
    /// Power saving divider.
    #[bits(8..=10, rw)]
    pwsdiv: u3,
    /// Card clock = `CLK_MCI / (2 * (clkdiv + 1))`.
    #[bits(0..=7, rw)]
    clkdiv: u8,
}

#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum TimeoutMultiplier {
    M1 = 0,
    M16 = 1,
    M128 = 2,
    M256 = 3,
    M1024 = 4,
    M4096 = 5,
    M65536 = 6,
    M1048576 = 7,
}

/// Layout shared by the data timeout and completion signal timeout registers.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Timeout {
    #[bits(4..=6, rw)]
    multiplier: TimeoutMultiplier,
    #[bits(0..=3, rw)]
    cycles: u4,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum BusWidth {
    OneBit = 0b00,
    Reserved = 0b01,
    FourBit = 0b10,
    EightBit = 0b11,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SdCard {
    #[bits(6..=7, rw)]
    bus_width: BusWidth,
    /// Slot select.
    #[bits(0..=1, rw)]
    slot: u2,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseType {
    None = 0,
    Bits48 = 1,
    Bits136 = 2,
    Bits48WithBusy = 3,
}

#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum SpecialCommand {
    Standard = 0,
    /// 74 clock cycles initialization sequence.
    Init = 1,
    Sync = 2,
    CeAtaCompletion = 3,
    InterruptCommand = 4,
    InterruptResponse = 5,
    BootOperation = 6,
    BootEnd = 7,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum TransferCommand {
    NoData = 0,
    Start = 1,
    Stop = 2,
    Reserved = 3,
}

#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum TransferType {
    SingleBlock = 0,
    MultiBlock = 1,
    Stream = 2,
    SdioByte = 4,
    SdioBlock = 5,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Command {
    #[bits(19..=21, rw)]
    trtyp: Option<TransferType>,
    /// Transfer direction. Set for reads.
    #[bit(18, rw)]
    trdir: bool,
    #[bits(16..=17, rw)]
    trcmd: TransferCommand,
    /// Maximum latency of 64 cycles instead of 5.
    #[bit(12, rw)]
    maxlat: bool,
    /// Open drain command.
    #[bit(11, rw)]
    opdcmd: bool,
    #[bits(8..=10, rw)]
    spcmd: SpecialCommand,
    #[bits(6..=7, rw)]
    rsptyp: ResponseType,
    #[bits(0..=5, rw)]
    cmdnb: u6,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Block {
    #[bits(16..=31, rw)]
    blklen: u16,
    #[bits(0..=15, rw)]
    bcnt: u16,
}

/// Layout shared by the status, interrupt enable, disable and mask registers.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Status {
    /// Underrun.
    #[bit(31, rw)]
    unre: bool,
    /// Overrun.
    #[bit(30, rw)]
    ovre: bool,
    #[bit(27, rw)]
    xfrdone: bool,
    #[bit(26, rw)]
    fifo_empty: bool,
    #[bit(25, rw)]
    dma_done: bool,
    #[bit(24, rw)]
    blkovre: bool,
    /// Completion signal timeout error.
    #[bit(23, rw)]
    cstoe: bool,
    /// Data timeout error.
    #[bit(22, rw)]
    dtoe: bool,
    /// Data CRC error.
    #[bit(21, rw)]
    dcrce: bool,
    /// Response timeout error.
    #[bit(20, rw)]
    rtoe: bool,
    /// Response end bit error.
    #[bit(19, rw)]
    rende: bool,
    /// Response CRC error.
    #[bit(18, rw)]
    rcrce: bool,
    /// Response direction error.
    #[bit(17, rw)]
    rdire: bool,
    /// Response index error.
    #[bit(16, rw)]
    rinde: bool,
    #[bit(5, rw)]
    not_busy: bool,
    /// Data transfer in progress.
    #[bit(4, rw)]
    dtip: bool,
    /// Data block ended.
    #[bit(3, rw)]
    blke: bool,
    #[bit(2, rw)]
    txrdy: bool,
    #[bit(1, rw)]
    rxrdy: bool,
    #[bit(0, rw)]
    cmdrdy: bool,
}

impl Status {
    /// Response errors, excluding the CRC error.
    pub const RESPONSE_ERRORS: Self = Self::DEFAULT
        .with_cstoe(true)
        .with_rtoe(true)
        .with_rende(true)
        .with_rdire(true)
        .with_rinde(true);

    /// Errors which can occur during the data phase.
    pub const DATA_ERRORS: Self = Self::DEFAULT
        .with_unre(true)
        .with_ovre(true)
        .with_dtoe(true)
        .with_dcrce(true);
}

#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkSize {
    Bytes4 = 0,
    Bytes8 = 1,
    Bytes16 = 2,
    Bytes32 = 3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DmaConfig {
    /// Read optimization with padding.
    #[bit(12, rw)]
    ropt: bool,
    #[bit(8, rw)]
    dma_en: bool,
    #[bits(4..=6, rw)]
    chksize: Option<ChunkSize>,
    #[bits(0..=1, rw)]
    offset: u2,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Config {
    /// Synchronize on the last block.
    #[bit(12, rw)]
    lsync: bool,
    #[bit(8, rw)]
    hs_mode: bool,
    /// Flow error flag reset control. Set to reset the flags on status read.
    #[bit(4, rw)]
    ferrctrl: bool,
    /// FIFO mode. Set to write as soon as one byte is available.
    #[bit(0, rw)]
    fifo_mode: bool,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Mci {
    #[mmio(Write)]
    cr: Control,
    mr: Mode,
    /// Data timeout register.
    dtor: Timeout,
    /// SD/SDIO card register.
    sdcr: SdCard,
    /// Argument register.
    argr: u32,
    #[mmio(Write)]
    cmdr: Command,
    blkr: Block,
    /// Completion signal timeout register.
    cstor: Timeout,
    /// Response registers. Each read returns the next response word.
    #[mmio(Read)]
    rspr: [u32; 4],
    /// Receive data register.
    #[mmio(Read)]
    rdr: u32,
    /// Transmit data register.
    #[mmio(Write)]
    tdr: u32,

    _reserved_0: [u32; 2],

    #[mmio(Read)]
    sr: Status,
    #[mmio(Write)]
    ier: Status,
    #[mmio(Write)]
    idr: Status,
    #[mmio(PureRead)]
    imr: Status,
    dma: DmaConfig,
    cfg: Config,

    _reserved_1: [u32; 35],

    /// Write protection mode register.
    wpmr: u32,
    #[mmio(PureRead)]
    wpsr: u32,

    _reserved_2: [u32; 4],

    #[mmio(PureRead)]
    version: u32,

    _reserved_3: [u32; 64],

    fifo: [u32; 256],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Mci>(), 0x600);

impl Mci {
    /// Create a new MCI MMIO instance at the fixed address [MCI_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioMci<'static> {
        unsafe { Self::new_mmio_at(MCI_BASE) }
    }
}
