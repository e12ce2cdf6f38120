use core::convert::Infallible;

use arbitrary_int::u9;
use uc3a3::usart::{Control, InterruptControl, MmioUsart, Thr};

use super::UsartId;

pub struct Tx {
    pub(crate) regs: MmioUsart<'static>,
    pub(crate) id: UsartId,
}

impl Tx {
    /// Steal the TX side of the USART for a given USART index.
    ///
    /// # Safety
    ///
    /// Circumvents safety guarantees provided by the compiler.
    #[inline]
    pub const unsafe fn steal(id: UsartId) -> Self {
        Tx {
            regs: unsafe { id.regs() },
            id,
        }
    }

    #[inline]
    pub const fn usart_id(&self) -> UsartId {
        self.id
    }

    #[inline]
    pub const fn regs(&mut self) -> &mut MmioUsart<'static> {
        &mut self.regs
    }

    /// Write a character of up to 9 bits. Only the configured number of bits is sent.
    #[inline]
    pub fn write_word(&mut self, word: u16) -> nb::Result<(), Infallible> {
        if !self.regs.read_csr().tx_rdy() {
            return Err(nb::Error::WouldBlock);
        }
        self.write_word_unchecked(word);
        Ok(())
    }

    #[inline]
    pub fn write_word_unchecked(&mut self, word: u16) {
        self.regs.write_thr(Thr::DEFAULT.with_txchr(u9::new(word & 0x1FF)));
    }

    /// Blocking write of a single byte.
    #[inline]
    pub fn write_byte(&mut self, byte: u8) {
        while !self.regs.read_csr().tx_rdy() {}
        self.write_word_unchecked(byte as u16);
    }

    #[inline]
    pub fn enable(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_tx_en(true));
    }

    #[inline]
    pub fn disable(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_tx_dis(true));
    }

    #[inline]
    pub fn soft_reset(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_tx_rst(true));
    }

    /// Blocks until the holding register and the shift register are empty.
    pub fn flush(&mut self) {
        while !self.regs.read_csr().tx_empty() {}
    }

    #[inline]
    pub fn enable_interrupts(&mut self) {
        self.regs.write_ier(
            InterruptControl::DEFAULT
                .with_tx_rdy(true)
                .with_tx_empty(true),
        );
    }

    #[inline]
    pub fn disable_interrupts(&mut self) {
        self.regs.write_idr(
            InterruptControl::DEFAULT
                .with_tx_rdy(true)
                .with_tx_empty(true),
        );
    }
}

impl embedded_hal_nb::serial::ErrorType for Tx {
    type Error = Infallible;
}

impl embedded_hal_nb::serial::Write for Tx {
    #[inline]
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.write_word(word as u16)
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if self.regs.read_csr().tx_empty() {
            return Ok(());
        }
        Err(nb::Error::WouldBlock)
    }
}

impl embedded_io::ErrorType for Tx {
    type Error = Infallible;
}

impl embedded_io::Write for Tx {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Block for the first byte only, then write as long as the holding register is free.
        self.write_byte(buf[0]);
        let mut written = 1;
        for byte in buf[1..].iter() {
            match self.write_word(*byte as u16) {
                Ok(_) => written += 1,
                Err(nb::Error::WouldBlock) => return Ok(written),
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Tx::flush(self);
        Ok(())
    }
}
