//! # USBB device mode driver
//!
//! Endpoint configuration, FIFO packet access, stall handling and the per endpoint DMA
//! channels. [BulkPair] exposes an IN/OUT endpoint pair as [BulkEndpoints].
use arbitrary_int::u7;
use uc3a3::usbb::{
    DmaControl, EndpointBanks, EndpointControl, EndpointReset, EndpointSize,
    EndpointStatus, EndpointType, MmioUsbDmaChannel, MmioUsbGeneral, MmioUsbb, NUM_ENDPOINTS,
    UsbControl, UsbDmaChannel, fifo_addr,
};

use super::fifo::FifoCursor;
use super::{BulkEndpoints, Direction, EndpointError, POLL_LIMIT, SetupPacket};

/// Largest DMA buffer of a single endpoint transfer.
pub const MAX_DMA_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EndpointConfigError {
    #[error("invalid endpoint number {0}")]
    InvalidEndpoint(usize),
    #[error("invalid endpoint size {0}")]
    InvalidSize(usize),
    #[error("endpoint configuration rejected")]
    NotConfigured,
}

/// Endpoint size field for a packet size of `bytes`, which must be a power of two in
/// `8..=1024`.
pub const fn endpoint_size(bytes: usize) -> Result<EndpointSize, EndpointConfigError> {
    Ok(match bytes {
        8 => EndpointSize::Bytes8,
        16 => EndpointSize::Bytes16,
        32 => EndpointSize::Bytes32,
        64 => EndpointSize::Bytes64,
        128 => EndpointSize::Bytes128,
        256 => EndpointSize::Bytes256,
        512 => EndpointSize::Bytes512,
        1024 => EndpointSize::Bytes1024,
        _ => return Err(EndpointConfigError::InvalidSize(bytes)),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    ep_type: EndpointType,
    direction: Direction,
    size: EndpointSize,
    banks: EndpointBanks,
}

impl EndpointConfig {
    pub const fn new(ep_type: EndpointType, direction: Direction, size: EndpointSize) -> Self {
        Self {
            ep_type,
            direction,
            size,
            banks: EndpointBanks::Single,
        }
    }

    /// Bulk endpoint with two banks.
    pub const fn bulk(direction: Direction, size: EndpointSize) -> Self {
        Self::new(EndpointType::Bulk, direction, size).with_banks(EndpointBanks::Double)
    }

    pub const fn control(size: EndpointSize) -> Self {
        Self::new(EndpointType::Control, Direction::Out, size)
    }

    pub const fn with_banks(mut self, banks: EndpointBanks) -> Self {
        self.banks = banks;
        self
    }

    #[inline]
    pub const fn size(&self) -> EndpointSize {
        self.size
    }

    /// Value of the endpoint configuration register.
    pub fn register(&self) -> uc3a3::usbb::EndpointConfig {
        uc3a3::usbb::EndpointConfig::DEFAULT
            .with_eptype(self.ep_type)
            .with_epdir(self.direction == Direction::In)
            .with_epsize(self.size)
            .with_epbk(self.banks)
            .with_alloc(true)
    }
}

pub struct UsbDevice {
    regs: MmioUsbb<'static>,
    general: MmioUsbGeneral<'static>,
    dma: [MmioUsbDmaChannel<'static>; NUM_ENDPOINTS],
    cursors: [FifoCursor; NUM_ENDPOINTS],
    sizes: [usize; NUM_ENDPOINTS],
}

impl UsbDevice {
    /// Enable the controller in device mode and attach to the bus.
    pub fn new(regs: MmioUsbb<'static>, mut general: MmioUsbGeneral<'static>) -> Self {
        general.write_usbcon(
            UsbControl::DEFAULT
                .with_uimod(true)
                .with_usbe(true)
                .with_otgpade(true),
        );
        let mut device = Self {
            regs,
            general,
            dma: core::array::from_fn(|ep| unsafe { UsbDmaChannel::new_mmio_fixed(ep) }),
            cursors: core::array::from_fn(|ep| FifoCursor::new(fifo_addr(ep) as *mut u8)),
            sizes: [0; NUM_ENDPOINTS],
        };
        device.attach();
        device
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioUsbb<'static> {
        &mut self.regs
    }

    #[inline]
    pub fn general(&mut self) -> &mut MmioUsbGeneral<'static> {
        &mut self.general
    }

    pub fn attach(&mut self) {
        self.regs.modify_udcon(|mut udcon| {
            udcon.set_detach(false);
            udcon
        });
    }

    pub fn detach(&mut self) {
        self.regs.modify_udcon(|mut udcon| {
            udcon.set_detach(true);
            udcon
        });
    }

    /// Bus reset seen. Clears the flag.
    pub fn take_bus_reset(&mut self) -> bool {
        let reset = self.regs.read_udint().eorst();
        if reset {
            self.regs
                .write_udintclr(uc3a3::usbb::DeviceInterrupt::DEFAULT.with_eorst(true));
        }
        reset
    }

    /// The address is written first and enabled in a separate access.
    pub fn set_address(&mut self, address: u8) {
        self.regs.modify_udcon(|mut udcon| {
            udcon.set_uadd(u7::new(address & 0x7F));
            udcon.set_adden(false);
            udcon
        });
        self.regs.modify_udcon(|mut udcon| {
            udcon.set_adden(true);
            udcon
        });
    }

    pub fn configure_endpoint(
        &mut self,
        ep: usize,
        config: EndpointConfig,
    ) -> Result<(), EndpointConfigError> {
        if ep >= NUM_ENDPOINTS {
            return Err(EndpointConfigError::InvalidEndpoint(ep));
        }
        self.regs.modify_uerst(|uerst| {
            EndpointReset::new_with_raw_value(uerst.raw_value() | (1 << ep))
        });
        self.regs
            .write_uecfg(ep, config.register())
            .map_err(|_| EndpointConfigError::InvalidEndpoint(ep))?;
        if !self.status(ep).cfgok() {
            return Err(EndpointConfigError::NotConfigured);
        }
        self.sizes[ep] = config.size().bytes();
        self.cursors[ep].reset();
        Ok(())
    }

    #[inline]
    fn status(&self, ep: usize) -> EndpointStatus {
        self.regs
            .read_uesta(ep)
            .unwrap_or(EndpointStatus::DEFAULT)
    }

    #[inline]
    fn control(&self, ep: usize) -> EndpointControl {
        self.regs
            .read_uecon(ep)
            .unwrap_or(EndpointControl::DEFAULT)
    }

    fn clear_status(&mut self, ep: usize, flags: EndpointStatus) {
        if self.regs.write_uestaclr(ep, flags).is_err() {
            log::warn!("status clear on invalid endpoint {ep}");
        }
    }

    fn set_control(&mut self, ep: usize, flags: EndpointControl) {
        if self.regs.write_ueconset(ep, flags).is_err() {
            log::warn!("control set on invalid endpoint {ep}");
        }
    }

    fn clear_control(&mut self, ep: usize, flags: EndpointControl) {
        if self.regs.write_ueconclr(ep, flags).is_err() {
            log::warn!("control clear on invalid endpoint {ep}");
        }
    }

    #[inline]
    pub fn packet_size(&self, ep: usize) -> usize {
        self.sizes.get(ep).copied().unwrap_or(0)
    }

    pub fn is_endpoint_enabled(&self, ep: usize) -> bool {
        self.regs.read_uerst().epen().value() & (1 << ep) != 0
    }

    pub fn reset_fifo_cursor(&mut self, ep: usize) {
        if let Some(cursor) = self.cursors.get_mut(ep) {
            cursor.reset();
        }
    }

    #[inline]
    pub fn byte_count(&self, ep: usize) -> usize {
        self.status(ep).byct().value() as usize
    }

    #[inline]
    pub fn busy_banks(&self, ep: usize) -> u8 {
        self.status(ep).nbusybk().value()
    }

    /// Write into the current IN bank. Returns the number of bytes not written.
    pub fn write_packet(&mut self, ep: usize, data: &[u8]) -> usize {
        let available = self.packet_size(ep).saturating_sub(self.byte_count(ep));
        match self.cursors.get_mut(ep) {
            Some(cursor) => unsafe { cursor.write(data, available) },
            None => data.len(),
        }
    }

    /// Read from the current OUT bank. Returns the number of bytes not read.
    pub fn read_packet(&mut self, ep: usize, buf: &mut [u8]) -> usize {
        let available = self.byte_count(ep);
        match self.cursors.get_mut(ep) {
            Some(cursor) => unsafe { cursor.read(buf, available) },
            None => buf.len(),
        }
    }

    #[inline]
    pub fn is_in_ready(&self, ep: usize) -> bool {
        self.status(ep).txini()
    }

    pub fn send_in(&mut self, ep: usize) {
        self.clear_status(ep, EndpointStatus::DEFAULT.with_txini(true));
        self.clear_control(ep, EndpointControl::DEFAULT.with_fifocon(true));
        self.reset_fifo_cursor(ep);
    }

    #[inline]
    pub fn is_out_received(&self, ep: usize) -> bool {
        self.status(ep).rxouti()
    }

    pub fn ack_out(&mut self, ep: usize) {
        self.clear_status(ep, EndpointStatus::DEFAULT.with_rxouti(true));
        self.clear_control(ep, EndpointControl::DEFAULT.with_fifocon(true));
        self.reset_fifo_cursor(ep);
    }

    pub fn stall(&mut self, ep: usize) {
        self.set_control(ep, EndpointControl::DEFAULT.with_stallrq(true));
    }

    /// Clear the stall handshake and reset the data toggle.
    pub fn clear_stall(&mut self, ep: usize) {
        self.clear_control(ep, EndpointControl::DEFAULT.with_stallrq(true));
        self.set_control(ep, EndpointControl::DEFAULT.with_rstdt(true));
        self.clear_status(ep, EndpointStatus::DEFAULT.with_stalledi(true));
    }

    #[inline]
    pub fn is_stall_requested(&self, ep: usize) -> bool {
        self.control(ep).stallrq()
    }

    pub fn set_autoswitch(&mut self, ep: usize, enable: bool) {
        let result = self.regs.modify_uecfg(ep, |mut cfg| {
            cfg.set_autosw(enable);
            cfg
        });
        if result.is_err() {
            log::warn!("autoswitch change on invalid endpoint {ep}");
        }
    }

    /// Start an endpoint DMA transfer of `len` bytes.
    ///
    /// # Safety
    ///
    /// `ram` must stay valid for `len` bytes until [Self::is_dma_complete] returns true.
    pub unsafe fn start_dma(
        &mut self,
        ep: usize,
        ram: *mut u8,
        len: usize,
    ) -> Result<(), EndpointError> {
        if ep == 0 || ep >= NUM_ENDPOINTS || len == 0 || len > MAX_DMA_LEN {
            return Err(EndpointError::InvalidDmaTransfer(len));
        }
        let channel = &mut self.dma[ep];
        channel.write_addr(ram as u32);
        channel.write_control(
            DmaControl::DEFAULT
                .with_ch_byte_length(len as u16)
                .with_end_b_en(true)
                .with_ch_en(true),
        );
        // The control write must complete before the status is polled.
        let _ = channel.read_control();
        Ok(())
    }

    #[inline]
    pub fn is_dma_complete(&self, ep: usize) -> bool {
        self.dma
            .get(ep)
            .is_none_or(|channel| !channel.read_status().ch_en())
    }

    pub fn is_setup_received(&self) -> bool {
        self.status(0).rxstpi()
    }

    /// Read the SETUP packet from the control endpoint and acknowledge it.
    pub fn read_setup(&mut self) -> SetupPacket {
        let mut raw = [0u8; 8];
        self.reset_fifo_cursor(0);
        self.read_packet(0, &mut raw);
        self.clear_status(0, EndpointStatus::DEFAULT.with_rxstpi(true));
        self.reset_fifo_cursor(0);
        SetupPacket::from_bytes(&raw)
    }

    /// Send the data stage of a control read.
    pub fn write_control_in(&mut self, data: &[u8]) -> Result<(), EndpointError> {
        let size = self.packet_size(0).max(8);
        for chunk in data.chunks(size) {
            self.wait_control_in_ready()?;
            self.write_packet(0, chunk);
            self.clear_status(0, EndpointStatus::DEFAULT.with_txini(true));
            self.reset_fifo_cursor(0);
        }
        Ok(())
    }

    /// Zero length IN packet, the status stage of a control write.
    pub fn send_control_zlp(&mut self) -> Result<(), EndpointError> {
        self.wait_control_in_ready()?;
        self.clear_status(0, EndpointStatus::DEFAULT.with_txini(true));
        Ok(())
    }

    /// Wait for the host's zero length OUT packet which ends a control read.
    pub fn wait_control_zlp_out(&mut self) -> Result<(), EndpointError> {
        let mut polls = 0;
        while !self.is_out_received(0) {
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(EndpointError::Timeout);
            }
        }
        self.clear_status(0, EndpointStatus::DEFAULT.with_rxouti(true));
        Ok(())
    }

    fn wait_control_in_ready(&mut self) -> Result<(), EndpointError> {
        let mut polls = 0;
        while !self.is_in_ready(0) {
            if self.is_out_received(0) {
                // Host aborted the data stage.
                return Err(EndpointError::Disabled);
            }
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(EndpointError::Timeout);
            }
        }
        Ok(())
    }

    /// Borrow an IN/OUT endpoint pair.
    pub fn bulk(&mut self, in_ep: usize, out_ep: usize) -> Result<BulkPair<'_>, EndpointConfigError> {
        for ep in [in_ep, out_ep] {
            if ep == 0 || ep >= NUM_ENDPOINTS {
                return Err(EndpointConfigError::InvalidEndpoint(ep));
            }
        }
        Ok(BulkPair {
            device: self,
            in_ep,
            out_ep,
        })
    }
}

pub struct BulkPair<'dev> {
    device: &'dev mut UsbDevice,
    in_ep: usize,
    out_ep: usize,
}

impl BulkPair<'_> {
    #[inline]
    fn ep(&self, dir: Direction) -> usize {
        match dir {
            Direction::In => self.in_ep,
            Direction::Out => self.out_ep,
        }
    }
}

impl BulkEndpoints for BulkPair<'_> {
    fn packet_size(&self, dir: Direction) -> usize {
        self.device.packet_size(self.ep(dir))
    }

    fn is_enabled(&mut self, dir: Direction) -> bool {
        self.device.is_endpoint_enabled(self.ep(dir))
    }

    fn out_received(&mut self) -> bool {
        self.device.is_out_received(self.out_ep)
    }

    fn read_out_packet(&mut self, buf: &mut [u8]) -> usize {
        let available = self.device.byte_count(self.out_ep).min(buf.len());
        available - self.device.read_packet(self.out_ep, &mut buf[..available])
    }

    fn ack_out(&mut self) {
        self.device.ack_out(self.out_ep);
    }

    fn in_ready(&mut self) -> bool {
        self.device.is_in_ready(self.in_ep)
    }

    fn write_in_packet(&mut self, data: &[u8]) -> usize {
        data.len() - self.device.write_packet(self.in_ep, data)
    }

    fn send_in(&mut self) {
        self.device.send_in(self.in_ep);
    }

    fn busy_banks(&mut self, dir: Direction) -> u8 {
        self.device.busy_banks(self.ep(dir))
    }

    fn stall(&mut self, dir: Direction) {
        self.device.stall(self.ep(dir));
    }

    fn is_stall_requested(&mut self, dir: Direction) -> bool {
        self.device.is_stall_requested(self.ep(dir))
    }

    fn set_autoswitch(&mut self, dir: Direction, enable: bool) {
        self.device.set_autoswitch(self.ep(dir), enable);
    }

    unsafe fn start_in_dma(&mut self, ram: *const u8, len: usize) -> Result<(), EndpointError> {
        unsafe { self.device.start_dma(self.in_ep, ram as *mut u8, len) }
    }

    unsafe fn start_out_dma(&mut self, ram: *mut u8, len: usize) -> Result<(), EndpointError> {
        unsafe { self.device.start_dma(self.out_ep, ram, len) }
    }

    fn is_dma_complete(&mut self, dir: Direction) -> bool {
        self.device.is_dma_complete(self.ep(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_sizes() {
        assert_eq!(endpoint_size(8), Ok(EndpointSize::Bytes8));
        assert_eq!(endpoint_size(512), Ok(EndpointSize::Bytes512));
        assert_eq!(endpoint_size(1024), Ok(EndpointSize::Bytes1024));
        assert_eq!(endpoint_size(100), Err(EndpointConfigError::InvalidSize(100)));
        assert_eq!(endpoint_size(2048), Err(EndpointConfigError::InvalidSize(2048)));
    }

    #[test]
    fn bulk_endpoint_register() {
        let cfg = EndpointConfig::bulk(Direction::In, EndpointSize::Bytes512).register();
        // Bulk, IN, 512 bytes, two banks, allocated.
        assert_eq!(cfg.raw_value(), (2 << 11) | (1 << 8) | (6 << 4) | (1 << 2) | (1 << 1));
        let cfg = EndpointConfig::control(EndpointSize::Bytes64).register();
        assert_eq!(cfg.raw_value(), (3 << 4) | (1 << 1));
    }
}
