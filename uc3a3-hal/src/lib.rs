//! # HAL for the AVR32 UC3A3 microcontroller family
//!
//! This crate contains the **H**ardware **A**bstraction **L**ayer (HAL), which is an additional
//! hardware abstraction on top of the [uc3a3] peripheral access crate, together with the USB
//! mass storage stack built on it:
//!
//! - [usb::msc]: SCSI block command decoder running over the USB Bulk-Only Transport.
//! - [ctrl_access]: logical unit abstraction which ties the storage media to the SCSI layer.
//! - [sd_mmc]: SD/MMC card protocol on top of the [mci] host driver, with pipelined DMA
//!   transfers between the card and the USB endpoints.
//!
//! The peripheral drivers implement the traits specified by the
//! [embedded-hal](https://github.com/rust-embedded/embedded-hal) project where applicable.
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

pub use uc3a3 as pac;

pub mod clocks;
pub mod ctrl_access;
pub mod dmaca;
pub mod gpio;
pub mod hmatrix;
pub mod log;
pub mod mci;
pub mod sd_mmc;
pub mod spi;
pub mod time;
pub mod twim;
pub mod usart;
pub mod usb;
