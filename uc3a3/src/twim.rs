//! Two-wire master interface (TWIM) register module.
use arbitrary_int::{u3, u4, u10};

pub const TWIM_0_BASE: usize = 0xFFFF_3800;
pub const TWIM_1_BASE: usize = 0xFFFF_3C00;

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct Control {
    /// Stop the current transfer.
    #[bit(8, w)]
    stop: bool,
    #[bit(7, w)]
    swrst: bool,
    #[bit(5, w)]
    smb_dis: bool,
    #[bit(4, w)]
    smb_en: bool,
    #[bit(1, w)]
    master_dis: bool,
    #[bit(0, w)]
    master_en: bool,
}

/// Clock waveform generator register.
///
/// All periods are counted in prescaled cycles of `pba / 2^(exp + 1)`.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ClockWaveform {
    #[bits(28..=30, rw)]
    exp: u3,
    /// Data setup and hold cycles.
    #[bits(24..=27, rw)]
    data: u4,
    /// START and STOP hold and setup cycles.
    #[bits(16..=23, rw)]
    stasto: u8,
    #[bits(8..=15, rw)]
    high: u8,
    #[bits(0..=7, rw)]
    low: u8,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Command {
    #[bit(25, rw)]
    acklast: bool,
    #[bit(24, rw)]
    pecen: bool,
    #[bits(16..=23, rw)]
    nbytes: u8,
    #[bit(15, rw)]
    valid: bool,
    #[bit(14, rw)]
    stop: bool,
    #[bit(13, rw)]
    start: bool,
    #[bit(12, rw)]
    repsame: bool,
    #[bit(11, rw)]
    tenbit: bool,
    /// Slave address. For 7-bit addressing, the address sits in bits 0..=6.
    #[bits(1..=10, rw)]
    sadr: u10,
    /// Transfer direction. Set for reads.
    #[bit(0, rw)]
    read: bool,
}

#[bitbybit::bitfield(u32, debug)]
pub struct ReceiveHolding {
    #[bits(0..=7, r)]
    rxdata: u8,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct TransmitHolding {
    #[bits(0..=7, w)]
    txdata: u8,
}

#[bitbybit::bitfield(u32, debug)]
pub struct Status {
    /// Master interface enabled.
    #[bit(16, r)]
    menb: bool,
    #[bit(14, r)]
    stop: bool,
    #[bit(13, r)]
    pecerr: bool,
    #[bit(12, r)]
    tout: bool,
    #[bit(11, r)]
    smbalert: bool,
    /// Arbitration lost.
    #[bit(10, r)]
    arblst: bool,
    /// NAK in data phase.
    #[bit(9, r)]
    dnak: bool,
    /// NAK in address phase.
    #[bit(8, r)]
    anak: bool,
    #[bit(5, r)]
    busfree: bool,
    #[bit(4, r)]
    idle: bool,
    /// Command complete.
    #[bit(3, r)]
    ccomp: bool,
    /// Ready for more commands.
    #[bit(2, r)]
    crdy: bool,
    #[bit(1, r)]
    txrdy: bool,
    #[bit(0, r)]
    rxrdy: bool,
}

/// Layout shared by the interrupt enable, disable and mask registers.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Interrupts {
    #[bit(14, rw)]
    stop: bool,
    #[bit(13, rw)]
    pecerr: bool,
    #[bit(12, rw)]
    tout: bool,
    #[bit(11, rw)]
    smbalert: bool,
    #[bit(10, rw)]
    arblst: bool,
    #[bit(9, rw)]
    dnak: bool,
    #[bit(8, rw)]
    anak: bool,
    #[bit(5, rw)]
    busfree: bool,
    #[bit(4, rw)]
    idle: bool,
    #[bit(3, rw)]
    ccomp: bool,
    #[bit(2, rw)]
    crdy: bool,
    #[bit(1, rw)]
    txrdy: bool,
    #[bit(0, rw)]
    rxrdy: bool,
}

impl Interrupts {
    pub const ALL: Self = Self::new_with_raw_value(0x7F3F);

    /// The flags which can be cleared with the status clear register.
    pub const CLEARABLE: Self = Self::new_with_raw_value(0x7F08);
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Twim {
    #[mmio(Write)]
    cr: Control,
    cwgr: ClockWaveform,
    /// SMBus timing register.
    smbtr: u32,
    cmdr: Command,
    /// Next command register.
    ncmdr: Command,
    #[mmio(Read)]
    rhr: ReceiveHolding,
    #[mmio(Write)]
    thr: TransmitHolding,
    #[mmio(PureRead)]
    sr: Status,
    #[mmio(Write)]
    ier: Interrupts,
    #[mmio(Write)]
    idr: Interrupts,
    #[mmio(PureRead)]
    imr: Interrupts,
    /// Status clear register.
    #[mmio(Write)]
    scr: Interrupts,
    /// Parameter register.
    #[mmio(PureRead)]
    pr: u32,
    #[mmio(PureRead)]
    vr: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Twim>(), 0x38);

impl Twim {
    /// Create a new TWIM MMIO instance for TWIM0 at address [TWIM_0_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed_0() -> MmioTwim<'static> {
        unsafe { Self::new_mmio_at(TWIM_0_BASE) }
    }

    /// Create a new TWIM MMIO instance for TWIM1 at address [TWIM_1_BASE].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed_0].
    pub const unsafe fn new_mmio_fixed_1() -> MmioTwim<'static> {
        unsafe { Self::new_mmio_at(TWIM_1_BASE) }
    }
}
