//! # USART module.
//!
//! Asynchronous (RS232) mode support for the USARTs. The drivers are blocking and mainly used
//! for diagnostics, see [crate::log].
use arbitrary_int::u3;
use uc3a3::usart::{
    BaudRateGenerator, ChMode, Control, InterruptControl, MmioUsart, Mode, USART_0_BASE,
    USART_1_BASE, USART_2_BASE, USART_3_BASE,
};

use crate::{clocks::Clocks, time::Hertz};

pub mod tx;
pub use tx::*;

pub mod rx;
pub use rx::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsartId {
    Usart0 = 0,
    Usart1 = 1,
    Usart2 = 2,
    Usart3 = 3,
}

pub trait PsUsart {
    fn reg_block(&self) -> MmioUsart<'static>;
    fn usart_id(&self) -> Option<UsartId>;
}

impl PsUsart for MmioUsart<'static> {
    #[inline]
    fn reg_block(&self) -> MmioUsart<'static> {
        unsafe { self.clone() }
    }

    fn usart_id(&self) -> Option<UsartId> {
        let base_addr = unsafe { self.ptr() } as usize;
        match base_addr {
            USART_0_BASE => Some(UsartId::Usart0),
            USART_1_BASE => Some(UsartId::Usart1),
            USART_2_BASE => Some(UsartId::Usart2),
            USART_3_BASE => Some(UsartId::Usart3),
            _ => None,
        }
    }
}

impl UsartId {
    /// Unsafely steal a peripheral MMIO block for the given USART.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL.
    pub const unsafe fn regs(&self) -> MmioUsart<'static> {
        match self {
            UsartId::Usart0 => unsafe { uc3a3::usart::Usart::new_mmio_fixed_0() },
            UsartId::Usart1 => unsafe { uc3a3::usart::Usart::new_mmio_fixed_1() },
            UsartId::Usart2 => unsafe { uc3a3::usart::Usart::new_mmio_fixed_2() },
            UsartId::Usart3 => unsafe { uc3a3::usart::Usart::new_mmio_fixed_3() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BaudError {
    #[error("baud rate is zero")]
    Zero,
    #[error("baud rate not attainable with the given peripheral clock")]
    Unattainable,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
    /// Parity bit forced to 0.
    Space,
    /// Parity bit forced to 1.
    Mark,
    #[default]
    None,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Stopbits {
    #[default]
    One,
    OnePointFive,
    Two,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CharLen {
    FiveBits,
    SixBits,
    SevenBits,
    #[default]
    EightBits,
    NineBits,
}

/// Raw baud rate generator configuration.
///
/// The baud rate is `pba / (over * (cd + fp / 8))` where `over` is the oversampling factor of
/// either 8 or 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudConfig {
    cd: u16,
    fp: u3,
    over8: bool,
}

impl BaudConfig {
    /// Calculate the divisors for the target baud rate.
    ///
    /// 16x oversampling is used if the peripheral clock allows it. The divisor is computed in
    /// 1/8 steps with rounding to the nearest value.
    pub fn calculate(pba: Hertz, baud: u32) -> Result<Self, BaudError> {
        if baud == 0 {
            return Err(BaudError::Zero);
        }
        let pba = pba.raw() as u64;
        let baud = baud as u64;
        let over = if pba >= 16 * baud { 16 } else { 8 };
        let cd_fp = (8 * pba + (over * baud) / 2) / (over * baud);
        let cd = cd_fp >> 3;
        if cd < 1 || cd > u16::MAX as u64 {
            return Err(BaudError::Unattainable);
        }
        Ok(Self {
            cd: cd as u16,
            fp: u3::new((cd_fp & 0b111) as u8),
            over8: over == 8,
        })
    }

    #[inline]
    pub const fn cd(&self) -> u16 {
        self.cd
    }

    #[inline]
    pub const fn fp(&self) -> u3 {
        self.fp
    }

    #[inline]
    pub const fn oversampling(&self) -> u32 {
        if self.over8 { 8 } else { 16 }
    }

    #[inline]
    pub fn actual_baud(&self, pba: Hertz) -> f64 {
        let divisor = self.cd as f64 + self.fp.value() as f64 / 8.0;
        pba.raw() as f64 / (self.oversampling() as f64 * divisor)
    }

    /// Relative baud error in percent.
    #[inline]
    pub fn error(&self, pba: Hertz, target_baud: u32) -> f64 {
        libm::fabs(self.actual_baud(pba) - target_baud as f64) / target_baud as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UsartConfig {
    baud: u32,
    chmode: ChMode,
    parity: Parity,
    stopbits: Stopbits,
    charlen: CharLen,
}

impl UsartConfig {
    /// 8 data bits, no parity and one stop bit.
    #[inline]
    pub const fn new_with_baud(baud: u32) -> Self {
        Self::new(
            baud,
            ChMode::Normal,
            Parity::None,
            Stopbits::One,
            CharLen::EightBits,
        )
    }

    #[inline]
    pub const fn new(
        baud: u32,
        chmode: ChMode,
        parity: Parity,
        stopbits: Stopbits,
        charlen: CharLen,
    ) -> Self {
        UsartConfig {
            baud,
            chmode,
            parity,
            stopbits,
            charlen,
        }
    }

    #[inline]
    pub const fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    #[inline]
    pub const fn with_stopbits(mut self, stopbits: Stopbits) -> Self {
        self.stopbits = stopbits;
        self
    }

    #[inline]
    pub const fn with_charlen(mut self, charlen: CharLen) -> Self {
        self.charlen = charlen;
        self
    }

    #[inline]
    pub const fn with_chmode(mut self, chmode: ChMode) -> Self {
        self.chmode = chmode;
        self
    }

    #[inline]
    pub const fn baud(&self) -> u32 {
        self.baud
    }

    #[inline]
    pub const fn chmode(&self) -> ChMode {
        self.chmode
    }

    #[inline]
    pub const fn parity(&self) -> Parity {
        self.parity
    }

    #[inline]
    pub const fn stopbits(&self) -> Stopbits {
        self.stopbits
    }

    #[inline]
    pub const fn charlen(&self) -> CharLen {
        self.charlen
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid USART ID")]
pub struct InvalidPsUsart;

#[derive(Debug, thiserror::Error)]
pub enum UsartConstructionError {
    #[error("invalid USART ID")]
    InvalidPsUsart(#[from] InvalidPsUsart),
    #[error("baud configuration error: {0}")]
    Baud(#[from] BaudError),
}

pub struct Usart {
    rx: Rx,
    tx: Tx,
    cfg: UsartConfig,
    baud_cfg: BaudConfig,
}

impl Usart {
    /// Create a USART driver in asynchronous mode. The pins must have been routed to the
    /// USART with [crate::gpio::PeriphPin] before.
    pub fn new(
        usart: impl PsUsart,
        clocks: &Clocks,
        cfg: UsartConfig,
    ) -> Result<Self, UsartConstructionError> {
        let id = usart.usart_id().ok_or(InvalidPsUsart)?;
        let baud_cfg = BaudConfig::calculate(clocks.pba(), cfg.baud())?;
        Ok(Self::new_generic_unchecked(usart.reg_block(), id, cfg, baud_cfg))
    }

    /// This is the generic constructor used by all other constructors.
    ///
    /// It does not do any resource checks.
    pub fn new_generic_unchecked(
        mut reg_block: MmioUsart<'static>,
        id: UsartId,
        cfg: UsartConfig,
        baud_cfg: BaudConfig,
    ) -> Usart {
        // Disable all interrupts and reset the channel.
        reg_block.write_idr(InterruptControl::new_with_raw_value(0xFFFF_FFFF));
        reg_block.write_mr(Mode::DEFAULT);
        reg_block.write_rtor(0);
        reg_block.write_ttgr(0);
        reg_block.write_cr(
            Control::DEFAULT
                .with_rx_rst(true)
                .with_tx_rst(true)
                .with_rststa(true)
                .with_rstit(true)
                .with_rts_dis(true),
        );

        reg_block.write_brgr(
            BaudRateGenerator::DEFAULT
                .with_cd(baud_cfg.cd())
                .with_fp(baud_cfg.fp()),
        );

        let mut mode = Mode::DEFAULT
            .with_over(baud_cfg.oversampling() == 8)
            .with_chmode(cfg.chmode())
            .with_nbstop(match cfg.stopbits() {
                Stopbits::One => uc3a3::usart::Stopbits::One,
                Stopbits::OnePointFive => uc3a3::usart::Stopbits::OnePointFive,
                Stopbits::Two => uc3a3::usart::Stopbits::Two,
            })
            .with_par(match cfg.parity() {
                Parity::Even => uc3a3::usart::Parity::Even,
                Parity::Odd => uc3a3::usart::Parity::Odd,
                Parity::Space => uc3a3::usart::Parity::ForcedTo0,
                Parity::Mark => uc3a3::usart::Parity::ForcedTo1,
                Parity::None => uc3a3::usart::Parity::NoParity,
            });
        match cfg.charlen() {
            CharLen::FiveBits => mode.set_chrl(uc3a3::usart::CharLen::FiveBits),
            CharLen::SixBits => mode.set_chrl(uc3a3::usart::CharLen::SixBits),
            CharLen::SevenBits => mode.set_chrl(uc3a3::usart::CharLen::SevenBits),
            CharLen::EightBits => mode.set_chrl(uc3a3::usart::CharLen::EightBits),
            CharLen::NineBits => mode.set_mode9(true),
        }
        reg_block.write_mr(mode);

        reg_block.write_cr(Control::DEFAULT.with_tx_en(true).with_rx_en(true));

        Usart {
            rx: Rx {
                regs: unsafe { reg_block.clone() },
                id,
            },
            tx: Tx {
                regs: reg_block,
                id,
            },
            cfg,
            baud_cfg,
        }
    }

    #[inline]
    pub fn set_mode(&mut self, mode: ChMode) {
        self.regs().modify_mr(|mut mr| {
            mr.set_chmode(mode);
            mr
        });
    }

    #[inline]
    pub const fn regs(&mut self) -> &mut MmioUsart<'static> {
        &mut self.tx.regs
    }

    #[inline]
    pub const fn cfg(&self) -> &UsartConfig {
        &self.cfg
    }

    #[inline]
    pub const fn baud_cfg(&self) -> &BaudConfig {
        &self.baud_cfg
    }

    #[inline]
    pub const fn id(&self) -> UsartId {
        self.tx.id
    }

    /// Blocking write of a single byte.
    #[inline]
    pub fn write_byte(&mut self, byte: u8) {
        self.tx.write_byte(byte);
    }

    /// Blocking read of a single byte.
    pub fn read_byte(&mut self) -> Result<u8, RxError> {
        loop {
            match self.rx.read_word() {
                Ok(word) => return Ok(word as u8),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(err)) => return Err(err),
            }
        }
    }

    /// Blocking write of a string.
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.tx.write_byte(byte);
        }
    }

    #[inline]
    pub fn flush(&mut self) {
        self.tx.flush();
    }

    #[inline]
    pub const fn split(self) -> (Tx, Rx) {
        (self.tx, self.rx)
    }
}

impl core::fmt::Write for Usart {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        Usart::write_str(self, s);
        Ok(())
    }
}

impl embedded_hal_nb::serial::ErrorType for Usart {
    type Error = RxError;
}

impl embedded_hal_nb::serial::Write for Usart {
    #[inline]
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.tx.write_word(word as u16).map_err(|e| match e {
            nb::Error::WouldBlock => nb::Error::WouldBlock,
        })
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if self.tx.regs.read_csr().tx_empty() {
            return Ok(());
        }
        Err(nb::Error::WouldBlock)
    }
}

impl embedded_hal_nb::serial::Read for Usart {
    #[inline]
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.rx.read_word().map(|word| word as u8)
    }
}

impl embedded_io::ErrorType for Usart {
    type Error = RxError;
}

impl embedded_io::Write for Usart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        // Infallible on the TX side.
        let Ok(written) = embedded_io::Write::write(&mut self.tx, buf);
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.tx.flush();
        Ok(())
    }
}

impl embedded_io::Read for Usart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        embedded_io::Read::read(&mut self.rx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::abs_diff_eq;

    const PBA_12_MHZ: Hertz = Hertz::from_raw(12_000_000);

    #[test]
    fn test_baud_115200() {
        let cfg = BaudConfig::calculate(PBA_12_MHZ, 115200).unwrap();
        assert_eq!(cfg.oversampling(), 16);
        assert_eq!(cfg.cd(), 6);
        assert_eq!(cfg.fp().value(), 4);
        assert!(abs_diff_eq!(
            cfg.actual_baud(PBA_12_MHZ),
            115384.61,
            epsilon = 0.01
        ));
        assert!(cfg.error(PBA_12_MHZ, 115200) < 0.2);
    }

    #[test]
    fn test_baud_57600() {
        let cfg = BaudConfig::calculate(PBA_12_MHZ, 57600).unwrap();
        assert_eq!(cfg.cd(), 13);
        assert_eq!(cfg.fp().value(), 0);
        assert!(abs_diff_eq!(
            cfg.actual_baud(PBA_12_MHZ),
            57692.30,
            epsilon = 0.01
        ));
    }

    #[test]
    fn test_baud_8x_oversampling() {
        let pba = Hertz::from_raw(1_000_000);
        let cfg = BaudConfig::calculate(pba, 115200).unwrap();
        assert_eq!(cfg.oversampling(), 8);
        assert_eq!(cfg.cd(), 1);
        assert_eq!(cfg.fp().value(), 1);
        assert!(abs_diff_eq!(cfg.actual_baud(pba), 111111.11, epsilon = 0.01));
    }

    #[test]
    fn test_baud_too_high() {
        let result = BaudConfig::calculate(Hertz::from_raw(100_000), 115200);
        assert_eq!(result, Err(BaudError::Unattainable));
    }

    #[test]
    fn test_baud_too_low() {
        let result = BaudConfig::calculate(Hertz::from_raw(66_000_000), 50);
        assert_eq!(result, Err(BaudError::Unattainable));
        assert!(BaudConfig::calculate(Hertz::from_raw(66_000_000), 300).is_ok());
    }

    #[test]
    fn test_baud_zero() {
        assert_eq!(BaudConfig::calculate(PBA_12_MHZ, 0), Err(BaudError::Zero));
    }
}
