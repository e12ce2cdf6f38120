//! High speed bus matrix (HMATRIX) register module.
use arbitrary_int::u4;

pub const HMATRIX_BASE: usize = 0xFFFE_1000;
pub const NUM_MASTERS: usize = 16;
pub const NUM_SLAVES: usize = 16;

/// Bus master index of the USBB DMA.
pub const MASTER_USBB_DMA: usize = 5;
/// Bus slave index of the USBB dual-port RAM.
pub const SLAVE_USBB_DPRAM: usize = 4;

/// Undefined length burst type.
#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum UndefinedBurst {
    Infinite = 0,
    Single = 1,
    FourBeat = 2,
    EightBeat = 3,
    SixteenBeat = 4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct MasterConfig {
    #[bits(0..=2, rw)]
    ulbt: Option<UndefinedBurst>,
}

#[bitbybit::bitenum(u2)]
#[derive(Debug, PartialEq, Eq)]
pub enum DefaultMasterType {
    NoDefault = 0,
    LastDefault = 1,
    FixedDefault = 2,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SlaveConfig {
    /// Arbitration type. Set for fixed priority arbitration.
    #[bit(24, rw)]
    arbt: bool,
    #[bits(18..=21, rw)]
    fixed_defmstr: u4,
    #[bits(16..=17, rw)]
    defmstr_type: Option<DefaultMasterType>,
    /// Maximum number of cycles for a burst before the slave is re-arbitrated.
    #[bits(0..=7, rw)]
    slot_cycle: u8,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Hmatrix {
    mcfg: [MasterConfig; NUM_MASTERS],
    scfg: [SlaveConfig; NUM_SLAVES],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Hmatrix>(), 0x80);

/// Convert a plain master index into the `FIXED_DEFMSTR` field value.
pub const fn master_index(master: usize) -> u4 {
    u4::new((master & 0xF) as u8)
}

impl Hmatrix {
    /// Create a new HMATRIX MMIO instance at the fixed address [HMATRIX_BASE].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioHmatrix<'static> {
        unsafe { Self::new_mmio_at(HMATRIX_BASE) }
    }
}
