//! USB high speed interface (USBB) register module, device mode.
//!
//! The endpoint registers come as arrays indexed by the endpoint number. The endpoint FIFOs are
//! not part of the register block. They live in a dedicated dual-port RAM window starting at
//! [FIFO_BASE] with one [FIFO_WINDOW_SIZE] sized window per endpoint.
use arbitrary_int::{u2, u6, u7, u11};

pub const USBB_BASE: usize = 0xFFFE_0000;
pub const NUM_ENDPOINTS: usize = 7;

pub const DMA_OFFSET: usize = 0x300;
pub const DMA_STRIDE: usize = 0x10;
pub const GENERAL_OFFSET: usize = 0x800;

pub const FIFO_BASE: usize = 0xE000_0000;
pub const FIFO_WINDOW_SIZE: usize = 0x10000;

/// Address of the FIFO window for the given endpoint.
#[inline]
pub const fn fifo_addr(endpoint: usize) -> usize {
    FIFO_BASE + (endpoint % NUM_ENDPOINTS) * FIFO_WINDOW_SIZE
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DeviceControl {
    /// Low speed mode.
    #[bit(12, rw)]
    ls: bool,
    /// Send an upstream resume.
    #[bit(9, rw)]
    rmwkup: bool,
    #[bit(8, rw)]
    detach: bool,
    /// Address enable. Must be set after the address was written in a previous access.
    #[bit(7, rw)]
    adden: bool,
    #[bits(0..=6, rw)]
    uadd: u7,
}

/// Layout shared by the device interrupt register and its clear, set and enable aliases.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DeviceInterrupt {
    #[bits(25..=30, rw)]
    dma: u6,
    /// Endpoint interrupts, one bit per endpoint.
    #[bits(12..=18, rw)]
    ep: u7,
    #[bit(6, rw)]
    uprsm: bool,
    /// End of resume.
    #[bit(5, rw)]
    eorsm: bool,
    #[bit(4, rw)]
    wakeup: bool,
    /// End of reset.
    #[bit(3, rw)]
    eorst: bool,
    #[bit(2, rw)]
    sof: bool,
    #[bit(0, rw)]
    susp: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct EndpointReset {
    #[bits(16..=22, rw)]
    eprst: u7,
    #[bits(0..=6, rw)]
    epen: u7,
}

#[bitbybit::bitfield(u32, debug)]
pub struct FrameNumber {
    /// Frame number CRC error.
    #[bit(15, r)]
    fncerr: bool,
    #[bits(3..=13, r)]
    fnum: u11,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum EndpointType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum EndpointSize {
    Bytes8 = 0,
    Bytes16 = 1,
    Bytes32 = 2,
    Bytes64 = 3,
    Bytes128 = 4,
    Bytes256 = 5,
    Bytes512 = 6,
    Bytes1024 = 7,
}

impl EndpointSize {
    #[inline]
    pub const fn bytes(&self) -> usize {
        8 << (*self as usize)
    }
}

#[bitbybit::bitenum(u2)]
#[derive(Debug, PartialEq, Eq)]
pub enum EndpointBanks {
    Single = 0,
    Double = 1,
    Triple = 2,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct EndpointConfig {
    #[bits(11..=12, rw)]
    eptype: EndpointType,
    /// Automatic bank switching.
    #[bit(9, rw)]
    autosw: bool,
    /// Set for IN endpoints.
    #[bit(8, rw)]
    epdir: bool,
    #[bits(4..=6, rw)]
    epsize: EndpointSize,
    #[bits(2..=3, rw)]
    epbk: Option<EndpointBanks>,
    /// Allocate the endpoint memory.
    #[bit(1, rw)]
    alloc: bool,
}

/// Layout shared by the endpoint status register and its clear and set aliases. Only the flag
/// bits 0..=7 can be cleared or set.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct EndpointStatus {
    /// Byte count of the current bank.
    #[bits(20..=30, rw)]
    byct: u11,
    #[bit(18, rw)]
    cfgok: bool,
    #[bit(17, rw)]
    ctrldir: bool,
    /// Read/write allowed on the current bank.
    #[bit(16, rw)]
    rwall: bool,
    #[bits(14..=15, rw)]
    currbk: u2,
    /// Number of busy banks.
    #[bits(12..=13, rw)]
    nbusybk: u2,
    #[bits(8..=9, rw)]
    dtseq: u2,
    #[bit(7, rw)]
    shortpacket: bool,
    #[bit(6, rw)]
    stalledi: bool,
    #[bit(5, rw)]
    overfi: bool,
    #[bit(4, rw)]
    nakini: bool,
    #[bit(3, rw)]
    nakouti: bool,
    /// Received SETUP.
    #[bit(2, rw)]
    rxstpi: bool,
    /// Received OUT data.
    #[bit(1, rw)]
    rxouti: bool,
    /// Transmitted IN data. Set while the current bank is free for new IN data.
    #[bit(0, rw)]
    txini: bool,
}

/// Layout shared by the endpoint control register and its set and clear aliases.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct EndpointControl {
    #[bit(19, rw)]
    stallrq: bool,
    /// Reset the data toggle sequence.
    #[bit(18, rw)]
    rstdt: bool,
    #[bit(16, rw)]
    epdishdma: bool,
    /// Hand the current bank to the controller (IN) or release it (OUT).
    #[bit(14, rw)]
    fifocon: bool,
    #[bit(13, rw)]
    killbk: bool,
    #[bit(12, rw)]
    nbusybke: bool,
    #[bit(7, rw)]
    shortpackete: bool,
    #[bit(6, rw)]
    stallede: bool,
    #[bit(5, rw)]
    overfe: bool,
    #[bit(4, rw)]
    nakine: bool,
    #[bit(3, rw)]
    nakoute: bool,
    #[bit(2, rw)]
    rxstpe: bool,
    #[bit(1, rw)]
    rxoute: bool,
    #[bit(0, rw)]
    txine: bool,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Usbb {
    udcon: DeviceControl,
    #[mmio(PureRead)]
    udint: DeviceInterrupt,
    #[mmio(Write)]
    udintclr: DeviceInterrupt,
    #[mmio(Write)]
    udintset: DeviceInterrupt,
    #[mmio(PureRead)]
    udinte: DeviceInterrupt,
    #[mmio(Write)]
    udinteclr: DeviceInterrupt,
    #[mmio(Write)]
    udinteset: DeviceInterrupt,
    uerst: EndpointReset,
    #[mmio(PureRead)]
    udfnum: FrameNumber,

    _reserved_0: [u32; 55],

    uecfg: [EndpointConfig; NUM_ENDPOINTS],
    _reserved_1: [u32; 5],
    #[mmio(PureRead)]
    uesta: [EndpointStatus; NUM_ENDPOINTS],
    _reserved_2: [u32; 5],
    #[mmio(Write)]
    uestaclr: [EndpointStatus; NUM_ENDPOINTS],
    _reserved_3: [u32; 5],
    #[mmio(Write)]
    uestaset: [EndpointStatus; NUM_ENDPOINTS],
    _reserved_4: [u32; 5],
    #[mmio(PureRead)]
    uecon: [EndpointControl; NUM_ENDPOINTS],
    _reserved_5: [u32; 5],
    #[mmio(Write)]
    ueconset: [EndpointControl; NUM_ENDPOINTS],
    _reserved_6: [u32; 5],
    #[mmio(Write)]
    ueconclr: [EndpointControl; NUM_ENDPOINTS],

    _reserved_7: [u32; 49],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Usbb>(), DMA_OFFSET);

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DmaControl {
    /// Buffer length in bytes. Zero means 64 kB.
    #[bits(16..=31, rw)]
    ch_byte_length: u16,
    #[bit(7, rw)]
    burst_lock_en: bool,
    #[bit(6, rw)]
    desc_ld_irq_en: bool,
    #[bit(5, rw)]
    end_buffit: bool,
    #[bit(4, rw)]
    end_tr_it: bool,
    #[bit(3, rw)]
    end_b_en: bool,
    #[bit(2, rw)]
    end_tr_en: bool,
    #[bit(1, rw)]
    ld_nxt_ch_desc_en: bool,
    #[bit(0, rw)]
    ch_en: bool,
}

#[bitbybit::bitfield(u32, debug)]
pub struct DmaStatus {
    #[bits(16..=31, r)]
    ch_byte_cnt: u16,
    #[bit(6, r)]
    desc_ldsta: bool,
    #[bit(5, r)]
    end_bf_st: bool,
    #[bit(4, r)]
    end_tr_st: bool,
    #[bit(1, r)]
    ch_active: bool,
    /// Cleared by the hardware once the programmed buffer was transferred.
    #[bit(0, r)]
    ch_en: bool,
}

/// Register block of a single endpoint DMA channel. Channel `n` serves endpoint `n`.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct UsbDmaChannel {
    nextdesc: u32,
    addr: u32,
    control: DmaControl,
    #[mmio(PureRead)]
    status: DmaStatus,
}

static_assertions::const_assert_eq!(core::mem::size_of::<UsbDmaChannel>(), DMA_STRIDE);

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct UsbControl {
    /// Set for device mode when the ID pin is not used.
    #[bit(25, rw)]
    uimod: bool,
    /// ID pin enable.
    #[bit(24, rw)]
    uide: bool,
    #[bit(15, rw)]
    usbe: bool,
    #[bit(14, rw)]
    frzclk: bool,
    #[bit(12, rw)]
    otgpade: bool,
    #[bit(1, rw)]
    vbuste: bool,
    #[bit(0, rw)]
    idte: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct UsbStatus {
    #[bit(14, rw)]
    clkusable: bool,
    #[bits(12..=13, rw)]
    speed: u2,
    #[bit(11, rw)]
    vbus: bool,
    #[bit(10, rw)]
    id: bool,
    #[bit(1, rw)]
    vbusti: bool,
    #[bit(0, rw)]
    idti: bool,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct UsbGeneral {
    usbcon: UsbControl,
    #[mmio(PureRead)]
    usbsta: UsbStatus,
    #[mmio(Write)]
    usbstaclr: UsbStatus,
    #[mmio(Write)]
    usbstaset: UsbStatus,
}

impl Usbb {
    /// Create a new USBB device MMIO instance at the fixed address [USBB_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioUsbb<'static> {
        unsafe { Self::new_mmio_at(USBB_BASE) }
    }
}

impl UsbDmaChannel {
    /// Create a MMIO handle for the DMA channel of the given endpoint. Indices wrap at
    /// [NUM_ENDPOINTS]. Endpoint 0 has no DMA channel.
    ///
    /// # Safety
    ///
    /// See [Usbb::new_mmio_fixed].
    pub const unsafe fn new_mmio_fixed(channel: usize) -> MmioUsbDmaChannel<'static> {
        unsafe { Self::new_mmio_at(USBB_BASE + DMA_OFFSET + (channel % NUM_ENDPOINTS) * DMA_STRIDE) }
    }
}

impl UsbGeneral {
    /// Create a MMIO handle for the general USBB registers.
    ///
    /// # Safety
    ///
    /// See [Usbb::new_mmio_fixed].
    pub const unsafe fn new_mmio_fixed() -> MmioUsbGeneral<'static> {
        unsafe { Self::new_mmio_at(USBB_BASE + GENERAL_OFFSET) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_size_bytes() {
        assert_eq!(EndpointSize::Bytes8.bytes(), 8);
        assert_eq!(EndpointSize::Bytes64.bytes(), 64);
        assert_eq!(EndpointSize::Bytes512.bytes(), 512);
        assert_eq!(EndpointSize::Bytes1024.bytes(), 1024);
    }

    #[test]
    fn fifo_windows() {
        assert_eq!(fifo_addr(0), 0xE000_0000);
        assert_eq!(fifo_addr(2), 0xE002_0000);
        assert_eq!(fifo_addr(NUM_ENDPOINTS), fifo_addr(0));
    }

    #[test]
    fn status_byte_count() {
        let sta = EndpointStatus::new_with_raw_value((31 << 20) | (1 << 18) | (2 << 12) | 0b10);
        assert_eq!(sta.byct().value(), 31);
        assert!(sta.cfgok());
        assert_eq!(sta.nbusybk().value(), 2);
        assert!(sta.rxouti());
        assert!(!sta.txini());
    }
}
