//! # Two-wire master interface (TWIM) module
//!
//! Blocking I2C master. Each transfer is a single TWIM command of up to [MAX_TRANSFER_LEN]
//! bytes.
use arbitrary_int::{u3, u10};
use embedded_hal::i2c::NoAcknowledgeSource;
use uc3a3::twim::{
    ClockWaveform, Command, Control, Interrupts, MmioTwim, Status, TWIM_0_BASE, TWIM_1_BASE,
    TransmitHolding,
};

use crate::{clocks::Clocks, time::Hertz};

pub const MAX_TRANSFER_LEN: usize = 255;
const MAX_EXP: u8 = 7;
/// Upper bound for status polling loops.
const POLL_LIMIT: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwimId {
    Twim0 = 0,
    Twim1 = 1,
}

pub trait PsTwim {
    fn reg_block(&self) -> MmioTwim<'static>;
    fn id(&self) -> Option<TwimId>;
}

impl PsTwim for MmioTwim<'static> {
    #[inline]
    fn reg_block(&self) -> MmioTwim<'static> {
        unsafe { self.clone() }
    }

    #[inline]
    fn id(&self) -> Option<TwimId> {
        let base_addr = unsafe { self.ptr() } as usize;
        if base_addr == TWIM_0_BASE {
            return Some(TwimId::Twim0);
        } else if base_addr == TWIM_1_BASE {
            return Some(TwimId::Twim1);
        }
        None
    }
}

impl TwimId {
    /// Unsafely steal a peripheral MMIO block for the given TWIM.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL.
    pub const unsafe fn regs(&self) -> MmioTwim<'static> {
        match self {
            TwimId::Twim0 => unsafe { uc3a3::twim::Twim::new_mmio_fixed_0() },
            TwimId::Twim1 => unsafe { uc3a3::twim::Twim::new_mmio_fixed_1() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwimSpeed {
    Standard100kHz,
    Fast400kHz,
}

impl TwimSpeed {
    pub const fn frequency(&self) -> Hertz {
        match self {
            TwimSpeed::Standard100kHz => Hertz::from_raw(100_000),
            TwimSpeed::Fast400kHz => Hertz::from_raw(400_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("I2C speed not attainable with the given peripheral clock")]
pub struct SpeedNotAttainable;

/// Clock waveform for the requested bus speed.
pub fn calculate_clock_waveform(
    pba: Hertz,
    speed: Hertz,
) -> Result<ClockWaveform, SpeedNotAttainable> {
    if speed.raw() == 0 {
        return Err(SpeedNotAttainable);
    }
    let mut f = pba.raw() / speed.raw() / 2;
    let mut exp = 0;
    while f > 0xFF {
        if exp == MAX_EXP {
            return Err(SpeedNotAttainable);
        }
        f /= 2;
        exp += 1;
    }
    Ok(ClockWaveform::DEFAULT
        .with_exp(u3::new(exp))
        .with_stasto(f as u8)
        .with_high((f - f / 2) as u8)
        .with_low((f / 2) as u8))
}

/// Bus speed resulting from a clock waveform configuration.
pub fn calculate_speed(pba: Hertz, cwgr: ClockWaveform) -> Hertz {
    let period = (cwgr.high() as u32 + cwgr.low() as u32) << (cwgr.exp().value() + 1);
    if period == 0 {
        return Hertz::from_raw(0);
    }
    Hertz::from_raw(pba.raw() / period)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TwimError {
    #[error("arbitration lost")]
    ArbitrationLoss,
    #[error("NACK received: {0:?}")]
    Nack(NoAcknowledgeSource),
    #[error("timeout")]
    Timeout,
    #[error("transfer length {0} exceeds command limit")]
    DataLenTooLarge(usize),
}

impl embedded_hal::i2c::Error for TwimError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        match self {
            TwimError::ArbitrationLoss => embedded_hal::i2c::ErrorKind::ArbitrationLoss,
            TwimError::Nack(source) => embedded_hal::i2c::ErrorKind::NoAcknowledge(*source),
            TwimError::Timeout | TwimError::DataLenTooLarge(_) => {
                embedded_hal::i2c::ErrorKind::Other
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid TWIM ID")]
pub struct InvalidPsTwimError;

#[derive(Debug, thiserror::Error)]
pub enum TwimConstructionError {
    #[error("invalid TWIM ID: {0}")]
    InvalidPsTwim(#[from] InvalidPsTwimError),
    #[error("speed error: {0}")]
    Speed(#[from] SpeedNotAttainable),
}

pub struct Twim {
    id: TwimId,
    regs: MmioTwim<'static>,
    speed: Hertz,
}

impl Twim {
    pub fn new(
        twim: impl PsTwim,
        clocks: &Clocks,
        speed: TwimSpeed,
    ) -> Result<Self, TwimConstructionError> {
        let id = twim.id().ok_or(InvalidPsTwimError)?;
        Self::new_generic_unchecked(id, twim.reg_block(), clocks, speed.frequency())
    }

    pub fn new_generic_unchecked(
        id: TwimId,
        mut regs: MmioTwim<'static>,
        clocks: &Clocks,
        speed: Hertz,
    ) -> Result<Self, TwimConstructionError> {
        let cwgr = calculate_clock_waveform(clocks.pba(), speed)?;
        regs.write_idr(Interrupts::ALL);
        regs.write_cr(Control::DEFAULT.with_master_en(true));
        regs.write_cr(Control::DEFAULT.with_swrst(true));
        regs.write_scr(Interrupts::CLEARABLE);
        regs.write_cwgr(cwgr);
        regs.write_cr(Control::DEFAULT.with_master_en(true));
        Ok(Self {
            id,
            regs,
            speed: calculate_speed(clocks.pba(), cwgr),
        })
    }

    #[inline]
    pub const fn id(&self) -> TwimId {
        self.id
    }

    /// Actual bus speed.
    #[inline]
    pub const fn speed(&self) -> Hertz {
        self.speed
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioTwim<'static> {
        &mut self.regs
    }

    fn command(addr: u8, len: usize, read: bool, generate_stop: bool) -> Command {
        Command::DEFAULT
            .with_nbytes(len as u8)
            .with_valid(true)
            .with_stop(generate_stop)
            .with_start(true)
            .with_sadr(u10::new(addr as u16 & 0x7F))
            .with_read(read)
    }

    fn check_errors(&mut self, status: Status) -> Result<(), TwimError> {
        let err = if status.arblst() {
            TwimError::ArbitrationLoss
        } else if status.anak() {
            TwimError::Nack(NoAcknowledgeSource::Address)
        } else if status.dnak() {
            TwimError::Nack(NoAcknowledgeSource::Data)
        } else if status.tout() {
            TwimError::Timeout
        } else {
            return Ok(());
        };
        self.clean_up_after_transfer_or_on_error();
        Err(err)
    }

    /// Poll the status register until the given condition holds, checking for bus errors.
    fn poll(&mut self, cond: impl Fn(Status) -> bool) -> Result<(), TwimError> {
        for _ in 0..POLL_LIMIT {
            let status = self.regs.read_sr();
            self.check_errors(status)?;
            if cond(status) {
                return Ok(());
            }
        }
        self.clean_up_after_transfer_or_on_error();
        Err(TwimError::Timeout)
    }

    /// Drop pending commands and clear the error flags after a failed transfer.
    pub fn clean_up_after_transfer_or_on_error(&mut self) {
        self.regs.write_cmdr(Command::DEFAULT);
        self.regs.write_ncmdr(Command::DEFAULT);
        self.regs.write_scr(Interrupts::CLEARABLE);
        self.regs.write_cr(Control::DEFAULT.with_master_en(true));
    }

    pub fn write_transfer_blocking(
        &mut self,
        addr: u8,
        data: &[u8],
        generate_stop: bool,
    ) -> Result<(), TwimError> {
        if data.len() > MAX_TRANSFER_LEN {
            return Err(TwimError::DataLenTooLarge(data.len()));
        }
        self.poll(|sr| sr.idle())?;
        self.regs.write_scr(Interrupts::CLEARABLE);
        self.regs
            .write_cmdr(Self::command(addr, data.len(), false, generate_stop));
        for byte in data {
            self.poll(|sr| sr.txrdy())?;
            self.regs
                .write_thr(TransmitHolding::DEFAULT.with_txdata(*byte));
        }
        self.poll(|sr| sr.ccomp())?;
        self.regs.write_scr(Interrupts::CLEARABLE);
        Ok(())
    }

    pub fn read_transfer_blocking(&mut self, addr: u8, data: &mut [u8]) -> Result<(), TwimError> {
        if data.len() > MAX_TRANSFER_LEN {
            return Err(TwimError::DataLenTooLarge(data.len()));
        }
        self.poll(|sr| sr.idle() || sr.crdy())?;
        self.regs.write_scr(Interrupts::CLEARABLE);
        self.regs
            .write_cmdr(Self::command(addr, data.len(), true, true));
        for byte in data.iter_mut() {
            self.poll(|sr| sr.rxrdy())?;
            *byte = self.regs.read_rhr().rxdata();
        }
        self.poll(|sr| sr.ccomp())?;
        self.regs.write_scr(Interrupts::CLEARABLE);
        Ok(())
    }
}

impl embedded_hal::i2c::ErrorType for Twim {
    type Error = TwimError;
}

impl embedded_hal::i2c::I2c for Twim {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        let num_ops = operations.len();
        for (idx, op) in operations.iter_mut().enumerate() {
            let last = idx + 1 == num_ops;
            match op {
                embedded_hal::i2c::Operation::Read(items) => {
                    self.read_transfer_blocking(address, items)?
                }
                embedded_hal::i2c::Operation::Write(items) => {
                    self.write_transfer_blocking(address, items, last)?
                }
            }
        }
        Ok(())
    }

    fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        // The read command starts with a repeated START.
        self.write_transfer_blocking(address, write, false)?;
        self.read_transfer_blocking(address, read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    #[test]
    fn waveform_standard_mode() {
        let cwgr = calculate_clock_waveform(66.MHz(), 100.kHz()).unwrap();
        assert_eq!(cwgr.exp().value(), 1);
        assert_eq!(cwgr.stasto(), 165);
        assert_eq!(cwgr.low(), 82);
        assert_eq!(cwgr.high(), 83);
        let speed = calculate_speed(66.MHz(), cwgr);
        assert!(speed.raw() <= 100_000);
        assert!(speed.raw() > 95_000);
    }

    #[test]
    fn waveform_fast_mode() {
        let cwgr = calculate_clock_waveform(12.MHz(), 400.kHz()).unwrap();
        assert_eq!(cwgr.exp().value(), 0);
        assert_eq!(cwgr.stasto(), 15);
        assert_eq!(cwgr.low(), 7);
        assert_eq!(cwgr.high(), 8);
        let speed = calculate_speed(12.MHz(), cwgr);
        assert_eq!(speed.raw(), 400_000);
    }

    #[test]
    fn waveform_unattainable() {
        assert!(matches!(
            calculate_clock_waveform(66.MHz(), 100.Hz()),
            Err(SpeedNotAttainable)
        ));
        assert!(matches!(
            calculate_clock_waveform(66.MHz(), 0.Hz()),
            Err(SpeedNotAttainable)
        ));
    }

    #[test]
    fn command_encoding() {
        let cmd = Twim::command(0x50, 16, true, true);
        assert_eq!(cmd.sadr().value(), 0x50);
        assert_eq!(cmd.nbytes(), 16);
        assert!(cmd.read());
        assert!(cmd.start());
        assert!(cmd.stop());
        assert!(cmd.valid());
        assert!(!Twim::command(0x50, 1, false, false).stop());
    }
}
