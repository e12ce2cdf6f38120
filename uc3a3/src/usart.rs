//! USART register module.
use arbitrary_int::{u3, u4, u9};

pub const USART_0_BASE: usize = 0xFFFF_1400;
pub const USART_1_BASE: usize = 0xFFFF_1800;
pub const USART_2_BASE: usize = 0xFFFF_1C00;
pub const USART_3_BASE: usize = 0xFFFF_2000;

#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum Parity {
    Even = 0b000,
    Odd = 0b001,
    /// Forced to 0 (Space)
    ForcedTo0 = 0b010,
    /// Forced to 1 (Mark)
    ForcedTo1 = 0b011,
    NoParity = 0b100,
    NoParityAlt = 0b101,
    Multidrop = 0b110,
    MultidropAlt = 0b111,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Default, Debug, PartialEq, Eq)]
pub enum CharLen {
    FiveBits = 0b00,
    SixBits = 0b01,
    SevenBits = 0b10,
    #[default]
    EightBits = 0b11,
}

#[bitbybit::bitenum(u2)]
#[derive(Default, Debug, PartialEq, Eq)]
pub enum Stopbits {
    #[default]
    One = 0b00,
    OnePointFive = 0b01,
    Two = 0b10,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ChMode {
    #[default]
    Normal = 0b00,
    AutoEcho = 0b01,
    LocalLoopback = 0b10,
    RemoteLoopback = 0b11,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ClockSelect {
    #[default]
    Clk = 0b00,
    ClkDiv = 0b01,
    Reserved = 0b10,
    External = 0b11,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct Control {
    #[bit(19, w)]
    rts_dis: bool,
    #[bit(18, w)]
    rts_en: bool,
    #[bit(15, w)]
    retto: bool,
    #[bit(13, w)]
    rstit: bool,
    #[bit(12, w)]
    senda: bool,
    /// Start waiting for a character before clocking the timeout counter.
    #[bit(11, w)]
    sttto: bool,
    /// Stop break.
    #[bit(10, w)]
    stpbrk: bool,
    /// Start break.
    #[bit(9, w)]
    sttbrk: bool,
    /// Reset status bits (PARE, FRAME, OVRE, RXBRK).
    #[bit(8, w)]
    rststa: bool,
    #[bit(7, w)]
    tx_dis: bool,
    #[bit(6, w)]
    tx_en: bool,
    #[bit(5, w)]
    rx_dis: bool,
    #[bit(4, w)]
    rx_en: bool,
    #[bit(3, w)]
    tx_rst: bool,
    #[bit(2, w)]
    rx_rst: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Mode {
    #[bit(28, rw)]
    filter: bool,
    /// Oversampling mode. 0: 16x, 1: 8x.
    #[bit(19, rw)]
    over: bool,
    #[bit(17, rw)]
    mode9: bool,
    #[bit(16, rw)]
    msbf: bool,
    #[bits(14..=15, rw)]
    chmode: ChMode,
    #[bits(12..=13, rw)]
    nbstop: Option<Stopbits>,
    #[bits(9..=11, rw)]
    par: Parity,
    #[bit(8, rw)]
    sync: bool,
    /// Char length.
    #[bits(6..=7, rw)]
    chrl: CharLen,
    #[bits(4..=5, rw)]
    usclks: ClockSelect,
    /// Operating mode. 0 is normal asynchronous mode.
    #[bits(0..=3, rw)]
    mode: u4,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct InterruptControl {
    #[bit(9, w)]
    tx_empty: bool,
    #[bit(8, w)]
    timeout: bool,
    #[bit(7, w)]
    pare: bool,
    #[bit(6, w)]
    frame: bool,
    #[bit(5, w)]
    ovre: bool,
    #[bit(2, w)]
    rxbrk: bool,
    #[bit(1, w)]
    tx_rdy: bool,
    #[bit(0, w)]
    rx_rdy: bool,
}

#[bitbybit::bitfield(u32, debug)]
pub struct InterruptMask {
    #[bit(9, r)]
    tx_empty: bool,
    #[bit(8, r)]
    timeout: bool,
    #[bit(7, r)]
    pare: bool,
    #[bit(6, r)]
    frame: bool,
    #[bit(5, r)]
    ovre: bool,
    #[bit(2, r)]
    rxbrk: bool,
    #[bit(1, r)]
    tx_rdy: bool,
    #[bit(0, r)]
    rx_rdy: bool,
}

/// Channel status register.
#[bitbybit::bitfield(u32, debug)]
pub struct Status {
    /// Transmitter empty: no character in THR and the shift register.
    #[bit(9, r)]
    tx_empty: bool,
    #[bit(8, r)]
    timeout: bool,
    /// Parity error.
    #[bit(7, r)]
    pare: bool,
    /// Framing error.
    #[bit(6, r)]
    frame: bool,
    /// Overrun error.
    #[bit(5, r)]
    ovre: bool,
    #[bit(2, r)]
    rxbrk: bool,
    #[bit(1, r)]
    tx_rdy: bool,
    #[bit(0, r)]
    rx_rdy: bool,
}

#[bitbybit::bitfield(u32, debug)]
pub struct Rhr {
    #[bit(15, r)]
    rxsynh: bool,
    #[bits(0..=8, r)]
    rxchr: u9,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct Thr {
    #[bit(15, w)]
    txsynh: bool,
    #[bits(0..=8, w)]
    txchr: u9,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct BaudRateGenerator {
    /// Fractional part of the clock divider, in 1/8 steps.
    #[bits(16..=18, rw)]
    fp: u3,
    #[bits(0..=15, rw)]
    cd: u16,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Usart {
    /// Control Register
    #[mmio(Write)]
    cr: Control,
    /// Mode register
    mr: Mode,
    /// Interrupt enable register
    #[mmio(Write)]
    ier: InterruptControl,
    /// Interrupt disable register
    #[mmio(Write)]
    idr: InterruptControl,
    /// Interrupt mask register
    #[mmio(PureRead)]
    imr: InterruptMask,
    /// Channel status register
    #[mmio(PureRead)]
    csr: Status,
    /// Receiver holding register
    #[mmio(Read)]
    rhr: Rhr,
    /// Transmitter holding register
    #[mmio(Write)]
    thr: Thr,
    /// Baud rate generator register
    brgr: BaudRateGenerator,
    /// Receiver timeout register
    rtor: u32,
    /// Transmitter timeguard register
    ttgr: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Usart>(), 0x2C);

impl Usart {
    /// Create a new USART MMIO instance for USART0 at address [USART_0_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed_0() -> MmioUsart<'static> {
        unsafe { Self::new_mmio_at(USART_0_BASE) }
    }

    /// Create a new USART MMIO instance for USART1 at address [USART_1_BASE].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed_0].
    pub const unsafe fn new_mmio_fixed_1() -> MmioUsart<'static> {
        unsafe { Self::new_mmio_at(USART_1_BASE) }
    }

    /// Create a new USART MMIO instance for USART2 at address [USART_2_BASE].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed_0].
    pub const unsafe fn new_mmio_fixed_2() -> MmioUsart<'static> {
        unsafe { Self::new_mmio_at(USART_2_BASE) }
    }

    /// Create a new USART MMIO instance for USART3 at address [USART_3_BASE].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed_0].
    pub const unsafe fn new_mmio_fixed_3() -> MmioUsart<'static> {
        unsafe { Self::new_mmio_at(USART_3_BASE) }
    }
}
