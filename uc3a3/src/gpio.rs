//! # GPIO register module.
//!
//! Every port controls 32 pins. Most registers come in groups of four: the value register
//! followed by its set, clear and toggle aliases.

pub const GPIO_BASE: usize = 0xFFFF_1000;
pub const PORT_STRIDE: usize = 0x100;
pub const NUM_PORTS: usize = 4;

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Port {
    /// GPIO enable. A set bit gives the pin to the GPIO, a cleared bit to a peripheral function.
    gper: u32,
    #[mmio(Write)]
    gpers: u32,
    #[mmio(Write)]
    gperc: u32,
    #[mmio(Write)]
    gpert: u32,
    /// Peripheral mux register 0 (function select bit 0).
    pmr0: u32,
    #[mmio(Write)]
    pmr0s: u32,
    #[mmio(Write)]
    pmr0c: u32,
    #[mmio(Write)]
    pmr0t: u32,
    /// Peripheral mux register 1 (function select bit 1).
    pmr1: u32,
    #[mmio(Write)]
    pmr1s: u32,
    #[mmio(Write)]
    pmr1c: u32,
    #[mmio(Write)]
    pmr1t: u32,

    _reserved_0: [u32; 4],

    /// Output driver enable.
    oder: u32,
    #[mmio(Write)]
    oders: u32,
    #[mmio(Write)]
    oderc: u32,
    #[mmio(Write)]
    odert: u32,
    /// Output value.
    ovr: u32,
    #[mmio(Write)]
    ovrs: u32,
    #[mmio(Write)]
    ovrc: u32,
    #[mmio(Write)]
    ovrt: u32,
    /// Pin value.
    #[mmio(PureRead)]
    pvr: u32,

    _reserved_1: [u32; 3],

    /// Pull-up enable.
    puer: u32,
    #[mmio(Write)]
    puers: u32,
    #[mmio(Write)]
    puerc: u32,
    #[mmio(Write)]
    puert: u32,
    /// Open drain mode.
    odmer: u32,
    #[mmio(Write)]
    odmers: u32,
    #[mmio(Write)]
    odmerc: u32,
    #[mmio(Write)]
    odmert: u32,
    /// Interrupt enable.
    ier: u32,
    #[mmio(Write)]
    iers: u32,
    #[mmio(Write)]
    ierc: u32,
    #[mmio(Write)]
    iert: u32,
    imr0: u32,
    #[mmio(Write)]
    imr0s: u32,
    #[mmio(Write)]
    imr0c: u32,
    #[mmio(Write)]
    imr0t: u32,
    imr1: u32,
    #[mmio(Write)]
    imr1s: u32,
    #[mmio(Write)]
    imr1c: u32,
    #[mmio(Write)]
    imr1t: u32,
    /// Glitch filter enable.
    gfer: u32,
    #[mmio(Write)]
    gfers: u32,
    #[mmio(Write)]
    gferc: u32,
    #[mmio(Write)]
    gfert: u32,
    /// Interrupt flags.
    #[mmio(PureRead)]
    ifr: u32,

    _reserved_2: u32,

    #[mmio(Write)]
    ifrc: u32,

    _reserved_3: [u32; 9],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Port>(), PORT_STRIDE);

/// GPIO register access.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Gpio {
    #[mmio(Inner)]
    port_0: Port,
    #[mmio(Inner)]
    port_1: Port,
    #[mmio(Inner)]
    port_2: Port,
    #[mmio(Inner)]
    port_3: Port,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Gpio>(), NUM_PORTS * PORT_STRIDE);

impl Gpio {
    /// Create a new GPIO MMIO instance at the fixed address [GPIO_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioGpio<'static> {
        unsafe { Self::new_mmio_at(GPIO_BASE) }
    }
}

impl Port {
    /// Create a MMIO handle for a single port. Port indices wrap at [NUM_PORTS].
    ///
    /// # Safety
    ///
    /// The pins of a port are shared between all users of the port. The set, clear and toggle
    /// aliases allow single-pin updates without read-modify-write sequences, but the caller
    /// is responsible for not touching pins it does not own.
    pub const unsafe fn new_mmio_fixed(port: usize) -> MmioPort<'static> {
        unsafe { Self::new_mmio_at(GPIO_BASE + (port % NUM_PORTS) * PORT_STRIDE) }
    }
}
