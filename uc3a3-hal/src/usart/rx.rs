use uc3a3::usart::{Control, InterruptControl, MmioUsart, Status};

use super::UsartId;

pub struct Rx {
    pub(crate) regs: MmioUsart<'static>,
    pub(crate) id: UsartId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RxError {
    #[error("RX overrun")]
    Overrun,
    #[error("framing error")]
    Framing,
    #[error("parity error")]
    Parity,
}

impl RxError {
    /// Extract the first error reported by the channel status register.
    pub const fn from_status(status: Status) -> Option<Self> {
        if status.ovre() {
            return Some(RxError::Overrun);
        }
        if status.frame() {
            return Some(RxError::Framing);
        }
        if status.pare() {
            return Some(RxError::Parity);
        }
        None
    }
}

impl embedded_hal_nb::serial::Error for RxError {
    fn kind(&self) -> embedded_hal_nb::serial::ErrorKind {
        match self {
            RxError::Overrun => embedded_hal_nb::serial::ErrorKind::Overrun,
            RxError::Framing => embedded_hal_nb::serial::ErrorKind::FrameFormat,
            RxError::Parity => embedded_hal_nb::serial::ErrorKind::Parity,
        }
    }
}

impl embedded_io::Error for RxError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::InvalidData
    }
}

impl Rx {
    /// Steal the RX side of the USART for a given USART index.
    ///
    /// # Safety
    ///
    /// Circumvents safety guarantees provided by the compiler.
    #[inline]
    pub const unsafe fn steal(id: UsartId) -> Self {
        Rx {
            regs: unsafe { id.regs() },
            id,
        }
    }

    #[inline]
    pub const fn usart_id(&self) -> UsartId {
        self.id
    }

    /// Read a received character of up to 9 bits.
    ///
    /// Pending overrun, framing and parity errors are reported first and cleared.
    pub fn read_word(&mut self) -> nb::Result<u16, RxError> {
        let status = self.regs.read_csr();
        if let Some(err) = RxError::from_status(status) {
            self.clear_errors();
            return Err(nb::Error::Other(err));
        }
        if !status.rx_rdy() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.read_word_unchecked())
    }

    #[inline(always)]
    pub fn read_word_unchecked(&mut self) -> u16 {
        self.regs.read_rhr().rxchr().value()
    }

    /// Reset the overrun, framing and parity error flags.
    #[inline]
    pub fn clear_errors(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_rststa(true));
    }

    /// Write the receiver timeout value in bit periods. A value of 0 disables the timeout.
    #[inline]
    pub fn set_rx_timeout_value(&mut self, rto: u16) {
        self.regs.write_rtor(rto as u32);
    }

    #[inline]
    pub fn enable(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_rx_en(true));
    }

    #[inline]
    pub fn disable(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_rx_dis(true));
    }

    #[inline]
    pub fn soft_reset(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_rx_rst(true));
    }

    /// Enables all interrupts relevant for the RX side of the USART.
    #[inline]
    pub fn enable_interrupts(&mut self) {
        self.regs.write_ier(
            InterruptControl::DEFAULT
                .with_rx_rdy(true)
                .with_ovre(true)
                .with_frame(true)
                .with_pare(true)
                .with_timeout(true),
        );
    }

    #[inline]
    pub fn disable_interrupts(&mut self) {
        self.regs.write_idr(
            InterruptControl::DEFAULT
                .with_rx_rdy(true)
                .with_ovre(true)
                .with_frame(true)
                .with_pare(true)
                .with_timeout(true),
        );
    }
}

impl embedded_hal_nb::serial::ErrorType for Rx {
    type Error = RxError;
}

impl embedded_hal_nb::serial::Read for Rx {
    #[inline]
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_word().map(|word| word as u8)
    }
}

impl embedded_io::ErrorType for Rx {
    type Error = RxError;
}

impl embedded_io::Read for Rx {
    /// Blocks until at least one byte was received, then reads as long as data is available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut read = 0;
        loop {
            match self.read_word() {
                Ok(word) => {
                    buf[read] = word as u8;
                    read += 1;
                    if read == buf.len() {
                        return Ok(read);
                    }
                }
                Err(nb::Error::WouldBlock) if read > 0 => return Ok(read),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(err)) => return Err(err),
            }
        }
    }
}
