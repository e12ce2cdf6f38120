//! Low-level GPIO access module.
use embedded_hal::digital::PinState;
use uc3a3::gpio::{MmioPort, Port};

use super::{Function, PinId};

pub struct LowLevelGpio {
    id: PinId,
    regs: MmioPort<'static>,
}

impl LowLevelGpio {
    pub fn new(id: PinId) -> Self {
        Self {
            id,
            regs: unsafe { Port::new_mmio_fixed(id.port() as usize) },
        }
    }

    #[inline]
    pub fn id(&self) -> PinId {
        self.id
    }

    #[inline]
    fn mask(&self) -> u32 {
        1 << self.id.num()
    }

    /// Convert the pin into an output pin.
    pub fn configure_as_output_push_pull(&mut self, init_level: PinState) {
        let mask = self.mask();
        // Write the level first to avoid glitches when the driver is enabled.
        self.write_state(init_level);
        self.regs.write_odmerc(mask);
        self.regs.write_oders(mask);
        self.regs.write_gpers(mask);
    }

    /// Convert the pin into a floating input pin.
    pub fn configure_as_input_floating(&mut self) {
        let mask = self.mask();
        self.regs.write_oderc(mask);
        self.regs.write_puerc(mask);
        self.regs.write_gpers(mask);
    }

    /// Convert the pin into an input pin with the internal pull-up enabled.
    pub fn configure_as_input_with_pull_up(&mut self) {
        let mask = self.mask();
        self.regs.write_oderc(mask);
        self.regs.write_puers(mask);
        self.regs.write_gpers(mask);
    }

    /// Hand the pin to a peripheral function. The function select bits are written before the
    /// GPIO releases the pin.
    pub fn configure_as_periph_pin(&mut self, function: Function, pullup: Option<bool>) {
        let mask = self.mask();
        let raw = function as u8;
        if raw & 0b01 != 0 {
            self.regs.write_pmr0s(mask);
        } else {
            self.regs.write_pmr0c(mask);
        }
        if raw & 0b10 != 0 {
            self.regs.write_pmr1s(mask);
        } else {
            self.regs.write_pmr1c(mask);
        }
        match pullup {
            Some(true) => self.regs.write_puers(mask),
            Some(false) => self.regs.write_puerc(mask),
            None => (),
        }
        self.regs.write_gperc(mask);
    }

    #[inline]
    pub fn write_state(&mut self, level: PinState) {
        match level {
            PinState::Low => self.regs.write_ovrc(self.mask()),
            PinState::High => self.regs.write_ovrs(self.mask()),
        }
    }

    #[inline]
    pub fn set_high(&mut self) {
        self.regs.write_ovrs(self.mask());
    }

    #[inline]
    pub fn set_low(&mut self) {
        self.regs.write_ovrc(self.mask());
    }

    #[inline]
    pub fn toggle(&mut self) {
        self.regs.write_ovrt(self.mask());
    }

    #[inline]
    pub fn is_high(&self) -> bool {
        self.regs.read_pvr() & self.mask() != 0
    }

    #[inline]
    pub fn is_low(&self) -> bool {
        !self.is_high()
    }

    #[inline]
    pub fn is_set_high(&self) -> bool {
        self.regs.read_ovr() & self.mask() != 0
    }

    #[inline]
    pub fn is_set_low(&self) -> bool {
        !self.is_set_high()
    }
}
