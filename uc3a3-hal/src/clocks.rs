//! Clock module.
//!
//! The HAL does not configure the oscillators, the PLLs or the clock dividers. The frequencies
//! produced by the application's clock setup are handed to the drivers with a [Clocks] value.
use super::time::Hertz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clocks {
    cpu: Hertz,
    hsb: Hertz,
    pba: Hertz,
    pbb: Hertz,
}

impl Clocks {
    #[inline]
    pub const fn new(cpu: Hertz, hsb: Hertz, pba: Hertz, pbb: Hertz) -> Self {
        Self { cpu, hsb, pba, pbb }
    }

    /// All clock domains run with the same frequency, which is the reset configuration when
    /// running from the main oscillator.
    #[inline]
    pub const fn new_single_domain(clk: Hertz) -> Self {
        Self::new(clk, clk, clk, clk)
    }

    #[inline]
    pub const fn cpu(&self) -> Hertz {
        self.cpu
    }

    /// High speed bus clock. USBB and DMACA are clocked by it.
    #[inline]
    pub const fn hsb(&self) -> Hertz {
        self.hsb
    }

    /// Peripheral bus A clock used by USART, SPI and TWIM.
    #[inline]
    pub const fn pba(&self) -> Hertz {
        self.pba
    }

    /// Peripheral bus B clock used by the MCI.
    #[inline]
    pub const fn pbb(&self) -> Hertz {
        self.pbb
    }
}

/// Busy-wait for at least `us` microseconds, assuming a loop iteration takes one CPU cycle.
pub fn delay_us(cpu: Hertz, us: u32) {
    let cycles = (cpu.raw() as u64 * us as u64).div_ceil(1_000_000);
    for _ in 0..cycles {
        core::hint::spin_loop();
    }
}
