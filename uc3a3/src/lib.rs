//! Rust peripheral access crate to the AVR32 UC3A3 microcontroller family.
//!
//! The register blocks are described with [derive_mmio] and the structured registers with
//! [bitbybit] bitfields. Each peripheral module exposes the fixed base addresses and `unsafe`
//! constructors for the MMIO handles.
#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

use core::sync::atomic::{AtomicBool, Ordering};

pub mod dmaca;
pub mod gpio;
pub mod hmatrix;
pub mod mci;
pub mod spi;
pub mod twim;
pub mod usart;
pub mod usbb;

static PERIPHERALS_TAKEN: AtomicBool = AtomicBool::new(false);

/// This is a collection of all the processing system peripherals.
pub struct Peripherals {
    pub usart0: usart::MmioUsart<'static>,
    pub usart1: usart::MmioUsart<'static>,
    pub usart2: usart::MmioUsart<'static>,
    pub usart3: usart::MmioUsart<'static>,
    pub gpio: gpio::MmioGpio<'static>,
    pub spi0: spi::MmioSpi<'static>,
    pub spi1: spi::MmioSpi<'static>,
    pub twim0: twim::MmioTwim<'static>,
    pub twim1: twim::MmioTwim<'static>,
    pub mci: mci::MmioMci<'static>,
    pub dmaca: dmaca::MmioDmacaGlobal<'static>,
    pub hmatrix: hmatrix::MmioHmatrix<'static>,
    pub usbb: usbb::MmioUsbb<'static>,
    pub usbb_general: usbb::MmioUsbGeneral<'static>,
}

impl Peripherals {
    /// Returns all peripherals a single time.
    pub fn take() -> Option<Self> {
        let taken = PERIPHERALS_TAKEN.swap(true, Ordering::Relaxed);
        if taken {
            return None;
        }
        Some(unsafe { Self::steal() })
    }

    /// Unchecked version of [Self::take].
    ///
    /// # Safety
    ///
    /// Each of the returned peripherals must be used at most once.
    pub unsafe fn steal() -> Self {
        unsafe {
            Self {
                usart0: usart::Usart::new_mmio_fixed_0(),
                usart1: usart::Usart::new_mmio_fixed_1(),
                usart2: usart::Usart::new_mmio_fixed_2(),
                usart3: usart::Usart::new_mmio_fixed_3(),
                gpio: gpio::Gpio::new_mmio_fixed(),
                spi0: spi::Spi::new_mmio_fixed_0(),
                spi1: spi::Spi::new_mmio_fixed_1(),
                twim0: twim::Twim::new_mmio_fixed_0(),
                twim1: twim::Twim::new_mmio_fixed_1(),
                mci: mci::Mci::new_mmio_fixed(),
                dmaca: dmaca::DmacaGlobal::new_mmio_fixed(),
                hmatrix: hmatrix::Hmatrix::new_mmio_fixed(),
                usbb: usbb::Usbb::new_mmio_fixed(),
                usbb_general: usbb::UsbGeneral::new_mmio_fixed(),
            }
        }
    }
}
