//! # Bus matrix (HMATRIX) module
use uc3a3::hmatrix::{
    DefaultMasterType, MASTER_USBB_DMA, MmioHmatrix, NUM_MASTERS, NUM_SLAVES, SLAVE_USBB_DPRAM,
    UndefinedBurst, master_index,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HmatrixError {
    #[error("invalid bus master {0}")]
    InvalidMaster(usize),
    #[error("invalid bus slave {0}")]
    InvalidSlave(usize),
}

pub struct Hmatrix {
    regs: MmioHmatrix<'static>,
}

impl Hmatrix {
    pub fn new(regs: MmioHmatrix<'static>) -> Self {
        Self { regs }
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioHmatrix<'static> {
        &mut self.regs
    }

    /// Set the undefined length burst type of a bus master.
    pub fn set_master_burst(
        &mut self,
        master: usize,
        burst: UndefinedBurst,
    ) -> Result<(), HmatrixError> {
        if master >= NUM_MASTERS {
            return Err(HmatrixError::InvalidMaster(master));
        }
        self.regs
            .modify_mcfg(master, |mut mcfg| {
                mcfg.set_ulbt(burst);
                mcfg
            })
            .map_err(|_| HmatrixError::InvalidMaster(master))
    }

    /// Make `master` the fixed default master of `slave`.
    pub fn set_slave_default_master(
        &mut self,
        slave: usize,
        master: usize,
    ) -> Result<(), HmatrixError> {
        if slave >= NUM_SLAVES {
            return Err(HmatrixError::InvalidSlave(slave));
        }
        if master >= NUM_MASTERS {
            return Err(HmatrixError::InvalidMaster(master));
        }
        self.regs
            .modify_scfg(slave, |mut scfg| {
                scfg.set_defmstr_type(DefaultMasterType::FixedDefault);
                scfg.set_fixed_defmstr(master_index(master));
                scfg
            })
            .map_err(|_| HmatrixError::InvalidSlave(slave))
    }

    /// Bus setup for mass storage transfers: the USBB DMA bursts without length limit and is
    /// the default master of the USBB DPRAM.
    pub fn configure_usb_dma_priority(&mut self) -> Result<(), HmatrixError> {
        self.set_master_burst(MASTER_USBB_DMA, UndefinedBurst::Infinite)?;
        self.set_slave_default_master(SLAVE_USBB_DPRAM, MASTER_USBB_DMA)
    }
}
