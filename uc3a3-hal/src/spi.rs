//! # SPI module
//!
//! Blocking master mode driver with fixed peripheral select. The SPI has no FIFO, so each word
//! is written to the transmit data register and the received word is read back before the next
//! one is sent.
use arbitrary_int::u4;
use embedded_hal::spi::{Mode, Phase, Polarity};
use uc3a3::spi::{
    ChipSelect, Control, InterruptControl, MmioSpi, SPI_0_BASE, SPI_1_BASE, TransmitData,
};

use crate::{clocks::Clocks, time::Hertz};

pub const NUM_CHIP_SELECTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiId {
    Spi0 = 0,
    Spi1 = 1,
}

pub trait PsSpi {
    fn reg_block(&self) -> MmioSpi<'static>;
    fn id(&self) -> Option<SpiId>;
}

impl PsSpi for MmioSpi<'static> {
    #[inline]
    fn reg_block(&self) -> MmioSpi<'static> {
        unsafe { self.clone() }
    }

    #[inline]
    fn id(&self) -> Option<SpiId> {
        let base_addr = unsafe { self.ptr() } as usize;
        if base_addr == SPI_0_BASE {
            return Some(SpiId::Spi0);
        } else if base_addr == SPI_1_BASE {
            return Some(SpiId::Spi1);
        }
        None
    }
}

impl SpiId {
    /// Unsafely steal a peripheral MMIO block for the given SPI.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL.
    pub const unsafe fn regs(&self) -> MmioSpi<'static> {
        match self {
            SpiId::Spi0 => unsafe { uc3a3::spi::Spi::new_mmio_fixed_0() },
            SpiId::Spi1 => unsafe { uc3a3::spi::Spi::new_mmio_fixed_1() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpiError {
    #[error("invalid SPI ID")]
    InvalidPsSpi,
    #[error("baud rate not attainable with the given peripheral clock")]
    BaudUnattainable,
    #[error("invalid number of bits per transfer {0}")]
    InvalidBits(u8),
    #[error("invalid chip select {0}")]
    InvalidChipSelect(u8),
    #[error("mode fault")]
    ModeFault,
    #[error("RX overrun")]
    Overrun,
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        match self {
            SpiError::ModeFault => embedded_hal::spi::ErrorKind::ModeFault,
            SpiError::Overrun => embedded_hal::spi::ErrorKind::Overrun,
            _ => embedded_hal::spi::ErrorKind::Other,
        }
    }
}

/// Serial clock baud rate divisor for the target clock, rounded up so the resulting clock does
/// not exceed the target.
pub fn calculate_scbr(pba: Hertz, baud: Hertz) -> Result<u8, SpiError> {
    if baud.raw() == 0 {
        return Err(SpiError::BaudUnattainable);
    }
    let div = pba.raw().div_ceil(baud.raw());
    if !(1..=255).contains(&div) {
        return Err(SpiError::BaudUnattainable);
    }
    Ok(div as u8)
}

/// PCS field value selecting a single chip select without external decoding.
#[inline]
pub const fn pcs_for_chip_select(cs: u8) -> u4 {
    u4::new(!(1 << (cs & 0b11)) & 0b1111)
}

#[derive(Debug, Clone, Copy)]
pub struct SpiConfig {
    baud: Hertz,
    mode: Mode,
    bits: u8,
    chip_select: u8,
    /// Delay before SPCK, in peripheral clock cycles.
    dlybs: u8,
    /// Delay between consecutive transfers, in multiples of 32 peripheral clock cycles.
    dlybct: u8,
    /// Keep the chip select asserted between transfers.
    cs_active_after_transfer: bool,
}

impl SpiConfig {
    /// 8 bits per transfer without delays.
    pub const fn new(baud: Hertz, mode: Mode, chip_select: u8) -> Self {
        Self {
            baud,
            mode,
            bits: 8,
            chip_select,
            dlybs: 0,
            dlybct: 0,
            cs_active_after_transfer: false,
        }
    }

    pub const fn with_bits(mut self, bits: u8) -> Self {
        self.bits = bits;
        self
    }

    pub const fn with_delays(mut self, dlybs: u8, dlybct: u8) -> Self {
        self.dlybs = dlybs;
        self.dlybct = dlybct;
        self
    }

    pub const fn with_cs_active_after_transfer(mut self, active: bool) -> Self {
        self.cs_active_after_transfer = active;
        self
    }

    #[inline]
    pub const fn baud(&self) -> Hertz {
        self.baud
    }

    #[inline]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    #[inline]
    pub const fn chip_select(&self) -> u8 {
        self.chip_select
    }
}

/// Build the chip select register value for a configuration.
pub fn chip_select_reg(pba: Hertz, config: &SpiConfig) -> Result<ChipSelect, SpiError> {
    if !(8..=16).contains(&config.bits) {
        return Err(SpiError::InvalidBits(config.bits));
    }
    let scbr = calculate_scbr(pba, config.baud)?;
    let cpol = config.mode.polarity == Polarity::IdleHigh;
    // NCPHA is set when data is captured on the leading clock edge.
    let ncpha = config.mode.phase == Phase::CaptureOnFirstTransition;
    Ok(ChipSelect::DEFAULT
        .with_dlybct(config.dlybct)
        .with_dlybs(config.dlybs)
        .with_scbr(scbr)
        .with_bits(u4::new(config.bits - 8))
        .with_csaat(config.cs_active_after_transfer)
        .with_cpol(cpol)
        .with_ncpha(ncpha))
}

pub struct Spi {
    id: SpiId,
    regs: MmioSpi<'static>,
    sclk: Hertz,
    config: SpiConfig,
}

impl Spi {
    pub fn new(spi: impl PsSpi, clocks: &Clocks, config: SpiConfig) -> Result<Self, SpiError> {
        let id = spi.id().ok_or(SpiError::InvalidPsSpi)?;
        Self::new_generic_unchecked(id, spi.reg_block(), clocks, config)
    }

    pub fn new_generic_unchecked(
        id: SpiId,
        mut regs: MmioSpi<'static>,
        clocks: &Clocks,
        config: SpiConfig,
    ) -> Result<Self, SpiError> {
        if config.chip_select as usize >= NUM_CHIP_SELECTS {
            return Err(SpiError::InvalidChipSelect(config.chip_select));
        }
        let csr = chip_select_reg(clocks.pba(), &config)?;
        regs.write_idr(InterruptControl::new_with_raw_value(0xFFFF_FFFF));
        regs.write_cr(Control::DEFAULT.with_swrst(true));
        regs.modify_mr(|mut mr| {
            mr.set_mstr(true);
            mr.set_modf_dis(true);
            mr.set_ps(false);
            mr.set_pcs_dec(false);
            mr.set_llb(false);
            mr.set_pcs(pcs_for_chip_select(config.chip_select));
            mr
        });
        regs.write_csr(config.chip_select as usize, csr)
            .map_err(|_| SpiError::InvalidChipSelect(config.chip_select))?;
        regs.write_cr(Control::DEFAULT.with_spi_en(true));
        Ok(Self {
            id,
            regs,
            sclk: clocks.pba() / csr.scbr() as u32,
            config,
        })
    }

    #[inline]
    pub const fn id(&self) -> SpiId {
        self.id
    }

    #[inline]
    pub const fn sclk(&self) -> Hertz {
        self.sclk
    }

    #[inline]
    pub const fn config(&self) -> &SpiConfig {
        &self.config
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioSpi<'static> {
        &mut self.regs
    }

    pub fn enable(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_spi_en(true));
    }

    pub fn disable(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_spi_dis(true));
    }

    /// Switch to another chip select with its own configuration.
    pub fn reconfigure(&mut self, clocks: &Clocks, config: SpiConfig) -> Result<(), SpiError> {
        if config.chip_select as usize >= NUM_CHIP_SELECTS {
            return Err(SpiError::InvalidChipSelect(config.chip_select));
        }
        let csr = chip_select_reg(clocks.pba(), &config)?;
        self.regs
            .write_csr(config.chip_select as usize, csr)
            .map_err(|_| SpiError::InvalidChipSelect(config.chip_select))?;
        self.regs.modify_mr(|mut mr| {
            mr.set_pcs(pcs_for_chip_select(config.chip_select));
            mr
        });
        self.sclk = clocks.pba() / csr.scbr() as u32;
        self.config = config;
        Ok(())
    }

    /// De-assert the chip select after the last transfer when it is held active between
    /// transfers.
    pub fn release_chip_select(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_lastxfer(true));
    }

    fn check_errors(&mut self) -> Result<(), SpiError> {
        let status = self.regs.read_sr();
        if status.modf() {
            return Err(SpiError::ModeFault);
        }
        if status.ovres() {
            return Err(SpiError::Overrun);
        }
        Ok(())
    }

    /// Full duplex transfer of a single word of up to 16 bits.
    pub fn transfer_word(&mut self, word: u16) -> Result<u16, SpiError> {
        while !self.regs.read_sr().tdre() {
            self.check_errors()?;
        }
        self.regs.write_tdr(TransmitData::DEFAULT.with_td(word));
        while !self.regs.read_sr().rdrf() {
            self.check_errors()?;
        }
        Ok(self.regs.read_rdr().rd())
    }
}

impl embedded_hal::spi::ErrorType for Spi {
    type Error = SpiError;
}

impl embedded_hal::spi::SpiBus for Spi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words.iter_mut() {
            *word = self.transfer_word(0)? as u8;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for word in words {
            self.transfer_word(*word as u16)?;
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let max_idx = core::cmp::max(read.len(), write.len());
        for idx in 0..max_idx {
            let out = write.get(idx).copied().unwrap_or(0);
            let received = self.transfer_word(out as u16)?;
            if let Some(slot) = read.get_mut(idx) {
                *slot = received as u8;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words.iter_mut() {
            *word = self.transfer_word(*word as u16)? as u8;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while !self.regs.read_sr().tx_empty() {
            self.check_errors()?;
        }
        Ok(())
    }
}
