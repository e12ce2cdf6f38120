//! GPIO support module for the UC3A3 family.
//!
//! Pins are addressed with a [PinId], which splits the global pin number into a 32-pin port
//! and the pin offset inside that port. The pin abstractions only touch the bits of their own
//! pin by using the set, clear and toggle aliases of the port registers.
pub mod ll;

use core::convert::Infallible;

pub use embedded_hal::digital::PinState;
use ll::LowLevelGpio;

/// Highest pin number of the largest package.
pub const MAX_PIN: u8 = 109;
pub const PINS_PER_PORT: u8 = 32;

#[derive(Debug, thiserror::Error)]
#[error("invalid pin number {0}")]
pub struct InvalidPinError(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinId {
    port: u8,
    num: u8,
}

impl PinId {
    /// Create a pin ID from the global pin number used by the datasheet pin tables.
    pub const fn new(pin: u8) -> Result<Self, InvalidPinError> {
        if pin > MAX_PIN {
            return Err(InvalidPinError(pin));
        }
        Ok(Self {
            port: pin / PINS_PER_PORT,
            num: pin % PINS_PER_PORT,
        })
    }

    #[inline]
    pub const fn port(&self) -> u8 {
        self.port
    }

    #[inline]
    pub const fn num(&self) -> u8 {
        self.num
    }

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.port * PINS_PER_PORT + self.num
    }
}

/// Peripheral function selected with the PMR1 and PMR0 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    A = 0b00,
    B = 0b01,
    C = 0b10,
    D = 0b11,
}

/// Enumeration of all pin modes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinMode {
    OutputPushPull,
    InputFloating,
    InputPullUp,
    Periph(Function),
}

/// Push-Pull output pin.
pub struct Output(LowLevelGpio);

impl Output {
    pub fn new(id: PinId, init_level: PinState) -> Self {
        let mut low_level = LowLevelGpio::new(id);
        low_level.configure_as_output_push_pull(init_level);
        Self(low_level)
    }

    #[inline]
    pub fn id(&self) -> PinId {
        self.0.id()
    }

    #[inline]
    pub fn set_low(&mut self) {
        self.0.set_low();
    }

    #[inline]
    pub fn set_high(&mut self) {
        self.0.set_high();
    }

    #[inline]
    pub fn toggle(&mut self) {
        self.0.toggle();
    }
}

impl embedded_hal::digital::ErrorType for Output {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for Output {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_low();
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set_high();
        Ok(())
    }
}

impl embedded_hal::digital::StatefulOutputPin for Output {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.is_set_high())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.is_set_low())
    }

    fn toggle(&mut self) -> Result<(), Self::Error> {
        self.0.toggle();
        Ok(())
    }
}

/// Input pin.
pub struct Input(LowLevelGpio);

impl Input {
    pub fn new_floating(id: PinId) -> Self {
        let mut low_level = LowLevelGpio::new(id);
        low_level.configure_as_input_floating();
        Self(low_level)
    }

    pub fn new_with_pull_up(id: PinId) -> Self {
        let mut low_level = LowLevelGpio::new(id);
        low_level.configure_as_input_with_pull_up();
        Self(low_level)
    }

    #[inline]
    pub fn id(&self) -> PinId {
        self.0.id()
    }

    pub fn is_high(&self) -> bool {
        self.0.is_high()
    }

    pub fn is_low(&self) -> bool {
        self.0.is_low()
    }
}

impl embedded_hal::digital::ErrorType for Input {
    type Error = Infallible;
}

impl embedded_hal::digital::InputPin for Input {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.is_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.is_low())
    }
}

/// Peripheral pin. The pin is controlled by the peripheral function it was assigned to.
pub struct PeriphPin {
    pin: LowLevelGpio,
    function: Function,
}

impl PeriphPin {
    /// Route the pin to a peripheral function. The pull-up configuration is only changed if
    /// `pullup` is [Some].
    pub fn new(id: PinId, function: Function, pullup: Option<bool>) -> Self {
        let mut low_level = LowLevelGpio::new(id);
        low_level.configure_as_periph_pin(function, pullup);
        Self {
            pin: low_level,
            function,
        }
    }

    #[inline]
    pub fn id(&self) -> PinId {
        self.pin.id()
    }

    #[inline]
    pub fn mode(&self) -> PinMode {
        PinMode::Periph(self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_id_split() {
        let id = PinId::new(0).unwrap();
        assert_eq!((id.port(), id.num()), (0, 0));
        let id = PinId::new(31).unwrap();
        assert_eq!((id.port(), id.num()), (0, 31));
        let id = PinId::new(32).unwrap();
        assert_eq!((id.port(), id.num()), (1, 0));
        let id = PinId::new(MAX_PIN).unwrap();
        assert_eq!((id.port(), id.num()), (3, 13));
        assert_eq!(id.raw(), MAX_PIN);
    }

    #[test]
    fn pin_id_out_of_range() {
        let err = PinId::new(110).unwrap_err();
        assert_eq!(err.0, 110);
    }
}
