//! SPI register module.
use arbitrary_int::u4;

pub const SPI_0_BASE: usize = 0xFFFF_2400;
pub const SPI_1_BASE: usize = 0xFFFF_2800;

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct Control {
    #[bit(24, w)]
    lastxfer: bool,
    #[bit(7, w)]
    swrst: bool,
    #[bit(1, w)]
    spi_dis: bool,
    #[bit(0, w)]
    spi_en: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Mode {
    /// Delay between chip selects, in peripheral clock cycles.
    #[bits(24..=31, rw)]
    dlybcs: u8,
    /// Peripheral chip select used in fixed peripheral mode. A cleared bit selects the chip.
    #[bits(16..=19, rw)]
    pcs: u4,
    /// Local loopback.
    #[bit(7, rw)]
    llb: bool,
    #[bit(6, rw)]
    rx_fifo_en: bool,
    /// Mode fault detection disable.
    #[bit(4, rw)]
    modf_dis: bool,
    #[bit(2, rw)]
    pcs_dec: bool,
    /// Variable peripheral select.
    #[bit(1, rw)]
    ps: bool,
    /// Master mode.
    #[bit(0, rw)]
    mstr: bool,
}

#[bitbybit::bitfield(u32, debug)]
pub struct ReceiveData {
    #[bits(16..=19, r)]
    pcs: u4,
    #[bits(0..=15, r)]
    rd: u16,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct TransmitData {
    #[bit(24, w)]
    lastxfer: bool,
    #[bits(16..=19, w)]
    pcs: u4,
    #[bits(0..=15, w)]
    td: u16,
}

#[bitbybit::bitfield(u32, debug)]
pub struct Status {
    #[bit(16, r)]
    spi_ens: bool,
    #[bit(9, r)]
    tx_empty: bool,
    #[bit(8, r)]
    nssr: bool,
    /// Overrun error.
    #[bit(3, r)]
    ovres: bool,
    /// Mode fault.
    #[bit(2, r)]
    modf: bool,
    /// Transmit data register empty.
    #[bit(1, r)]
    tdre: bool,
    /// Receive data register full.
    #[bit(0, r)]
    rdrf: bool,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct InterruptControl {
    #[bit(9, w)]
    tx_empty: bool,
    #[bit(8, w)]
    nssr: bool,
    #[bit(3, w)]
    ovres: bool,
    #[bit(2, w)]
    modf: bool,
    #[bit(1, w)]
    tdre: bool,
    #[bit(0, w)]
    rdrf: bool,
}

#[bitbybit::bitfield(u32, debug)]
pub struct InterruptMask {
    #[bit(9, r)]
    tx_empty: bool,
    #[bit(8, r)]
    nssr: bool,
    #[bit(3, r)]
    ovres: bool,
    #[bit(2, r)]
    modf: bool,
    #[bit(1, r)]
    tdre: bool,
    #[bit(0, r)]
    rdrf: bool,
}

/// Chip select register. The data width is `8 + bits`.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ChipSelect {
    /// Delay between consecutive transfers, in multiples of 32 peripheral clock cycles.
    #[bits(24..=31, rw)]
    dlybct: u8,
    /// Delay before SPCK, in peripheral clock cycles.
    #[bits(16..=23, rw)]
    dlybs: u8,
    /// Serial clock baud rate divisor.
    #[bits(8..=15, rw)]
    scbr: u8,
    #[bits(4..=7, rw)]
    bits: u4,
    /// Chip select active after transfer.
    #[bit(3, rw)]
    csaat: bool,
    /// Chip select not active after transfer.
    #[bit(2, rw)]
    csnaat: bool,
    #[bit(1, rw)]
    ncpha: bool,
    #[bit(0, rw)]
    cpol: bool,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Spi {
    #[mmio(Write)]
    cr: Control,
    mr: Mode,
    #[mmio(Read)]
    rdr: ReceiveData,
    #[mmio(Write)]
    tdr: TransmitData,
    #[mmio(PureRead)]
    sr: Status,
    #[mmio(Write)]
    ier: InterruptControl,
    #[mmio(Write)]
    idr: InterruptControl,
    #[mmio(PureRead)]
    imr: InterruptMask,

    _reserved: [u32; 4],

    csr: [ChipSelect; 4],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Spi>(), 0x40);

impl Spi {
    /// Create a new SPI MMIO instance for SPI0 at address [SPI_0_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed_0() -> MmioSpi<'static> {
        unsafe { Self::new_mmio_at(SPI_0_BASE) }
    }

    /// Create a new SPI MMIO instance for SPI1 at address [SPI_1_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed_1() -> MmioSpi<'static> {
        unsafe { Self::new_mmio_at(SPI_1_BASE) }
    }
}
