//! # USB device support
//!
//! [device] contains the USBB endpoint driver, [msc] the mass storage class running on a bulk
//! endpoint pair described by the [BulkEndpoints] trait.
pub mod device;
pub mod fifo;
pub mod msc;

/// Upper bound for polling loops waiting on the host.
pub const POLL_LIMIT: u32 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint disabled by a bus reset")]
    Disabled,
    #[error("timeout waiting for the host")]
    Timeout,
    #[error("endpoint DMA transfer of {0} bytes not possible")]
    InvalidDmaTransfer(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum RequestType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Control request received in a SETUP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const fn from_bytes(raw: &[u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    #[inline]
    pub const fn direction(&self) -> Direction {
        if self.request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    #[inline]
    pub fn kind(&self) -> Option<RequestType> {
        RequestType::try_from((self.request_type >> 5) & 0b11).ok()
    }

    #[inline]
    pub fn recipient(&self) -> Option<Recipient> {
        Recipient::try_from(self.request_type & 0x1F).ok()
    }
}

/// Bulk IN/OUT endpoint pair used by the mass storage class.
///
/// Packet transfers go through the endpoint FIFOs. The DMA methods move whole buffers between
/// RAM and the endpoint banks.
pub trait BulkEndpoints {
    fn packet_size(&self, dir: Direction) -> usize;
    fn is_enabled(&mut self, dir: Direction) -> bool;

    /// OUT data is available in the current bank.
    fn out_received(&mut self) -> bool;
    /// Read the current OUT bank. Returns the number of bytes read.
    fn read_out_packet(&mut self, buf: &mut [u8]) -> usize;
    /// Release the current OUT bank.
    fn ack_out(&mut self);

    /// The current IN bank can be written.
    fn in_ready(&mut self) -> bool;
    /// Append data to the current IN bank. Returns the number of bytes written.
    fn write_in_packet(&mut self, data: &[u8]) -> usize;
    /// Hand the current IN bank to the controller.
    fn send_in(&mut self);

    fn busy_banks(&mut self, dir: Direction) -> u8;
    fn stall(&mut self, dir: Direction);
    /// The stall handshake is still active, i.e. the host did not clear it yet.
    fn is_stall_requested(&mut self, dir: Direction) -> bool;
    fn set_autoswitch(&mut self, dir: Direction, enable: bool);

    /// Start moving `len` bytes from RAM to the IN endpoint.
    ///
    /// # Safety
    ///
    /// `ram` must stay valid for `len` bytes until [Self::is_dma_complete] returns true.
    unsafe fn start_in_dma(&mut self, ram: *const u8, len: usize) -> Result<(), EndpointError>;
    /// Start moving `len` bytes from the OUT endpoint to RAM.
    ///
    /// # Safety
    ///
    /// `ram` must stay valid for `len` bytes until [Self::is_dma_complete] returns true.
    unsafe fn start_out_dma(&mut self, ram: *mut u8, len: usize) -> Result<(), EndpointError>;
    fn is_dma_complete(&mut self, dir: Direction) -> bool;
}

/// Send `data` on the IN endpoint, split into packets. Returns the number of bytes sent.
pub fn write_in_data(ep: &mut dyn BulkEndpoints, data: &[u8]) -> Result<usize, EndpointError> {
    let packet_size = ep.packet_size(Direction::In).max(1);
    let mut sent = 0;
    for chunk in data.chunks(packet_size) {
        wait_in_ready(ep)?;
        sent += ep.write_in_packet(chunk);
        ep.send_in();
    }
    Ok(sent)
}

/// Fill `buf` from OUT packets. Returns the number of bytes received.
pub fn read_out_data(ep: &mut dyn BulkEndpoints, buf: &mut [u8]) -> Result<usize, EndpointError> {
    let mut received = 0;
    while received < buf.len() {
        let mut polls = 0;
        while !ep.out_received() {
            if !ep.is_enabled(Direction::Out) {
                return Err(EndpointError::Disabled);
            }
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(EndpointError::Timeout);
            }
        }
        let len = ep.read_out_packet(&mut buf[received..]);
        ep.ack_out();
        if len == 0 {
            break;
        }
        received += len;
    }
    Ok(received)
}

pub fn wait_in_ready(ep: &mut dyn BulkEndpoints) -> Result<(), EndpointError> {
    let mut polls = 0;
    while !ep.in_ready() {
        if !ep.is_enabled(Direction::In) {
            return Err(EndpointError::Disabled);
        }
        polls += 1;
        if polls >= POLL_LIMIT {
            return Err(EndpointError::Timeout);
        }
    }
    Ok(())
}

/// Wait until the controller sent all banks of the endpoint.
pub fn wait_drained(ep: &mut dyn BulkEndpoints, dir: Direction) -> Result<(), EndpointError> {
    let mut polls = 0;
    while ep.busy_banks(dir) != 0 {
        if !ep.is_enabled(dir) {
            return Err(EndpointError::Disabled);
        }
        polls += 1;
        if polls >= POLL_LIMIT {
            return Err(EndpointError::Timeout);
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum DmaEvent {
        CardStart,
        CardDone,
        UsbStart,
        UsbDone,
    }

    /// DMA events of the card and USB sides in the order they were observed.
    pub type DmaTrace = Rc<RefCell<Vec<DmaEvent>>>;

    /// Bulk endpoint pair backed by host side buffers.
    pub struct MockEndpoints {
        pub packet_size: usize,
        pub out_packets: VecDeque<Vec<u8>>,
        pub in_packets: Vec<Vec<u8>>,
        pub current_in: Vec<u8>,
        pub stalled_in: bool,
        pub stalled_out: bool,
        pub enabled: bool,
        pub autoswitch_in: bool,
        pub autoswitch_out: bool,
        /// Ordered record of DMA starts, for pipeline checks.
        pub dma_log: Vec<(Direction, usize)>,
        /// Polls a started DMA transfer stays busy.
        pub dma_pending_polls: u32,
        /// The host stopped reading the IN endpoint.
        pub stuck_in: bool,
        dma_countdown: u32,
        dma_active: bool,
        pub trace: Option<DmaTrace>,
    }

    impl MockEndpoints {
        pub fn new(packet_size: usize) -> Self {
            Self {
                packet_size,
                out_packets: VecDeque::new(),
                in_packets: Vec::new(),
                current_in: Vec::new(),
                stalled_in: false,
                stalled_out: false,
                enabled: true,
                autoswitch_in: false,
                autoswitch_out: false,
                dma_log: Vec::new(),
                dma_pending_polls: 0,
                stuck_in: false,
                dma_countdown: 0,
                dma_active: false,
                trace: None,
            }
        }

        fn dma_started(&mut self) {
            self.dma_countdown = self.dma_pending_polls;
            self.dma_active = true;
            if let Some(trace) = &self.trace {
                trace.borrow_mut().push(DmaEvent::UsbStart);
            }
        }

        pub fn push_out(&mut self, data: &[u8]) {
            for chunk in data.chunks(self.packet_size) {
                self.out_packets.push_back(chunk.to_vec());
            }
        }

        /// All IN data sent so far.
        pub fn in_data(&self) -> Vec<u8> {
            self.in_packets.concat()
        }
    }

    impl BulkEndpoints for MockEndpoints {
        fn packet_size(&self, _dir: Direction) -> usize {
            self.packet_size
        }

        fn is_enabled(&mut self, _dir: Direction) -> bool {
            self.enabled
        }

        fn out_received(&mut self) -> bool {
            !self.out_packets.is_empty()
        }

        fn read_out_packet(&mut self, buf: &mut [u8]) -> usize {
            match self.out_packets.front_mut() {
                Some(packet) => {
                    let len = packet.len().min(buf.len());
                    buf[..len].copy_from_slice(&packet[..len]);
                    packet.drain(..len);
                    len
                }
                None => 0,
            }
        }

        fn ack_out(&mut self) {
            self.out_packets.pop_front();
        }

        fn in_ready(&mut self) -> bool {
            self.enabled && !self.stuck_in
        }

        fn write_in_packet(&mut self, data: &[u8]) -> usize {
            let len = data
                .len()
                .min(self.packet_size - self.current_in.len());
            self.current_in.extend_from_slice(&data[..len]);
            len
        }

        fn send_in(&mut self) {
            let packet = core::mem::take(&mut self.current_in);
            self.in_packets.push(packet);
        }

        fn busy_banks(&mut self, dir: Direction) -> u8 {
            (dir == Direction::In && self.stuck_in) as u8
        }

        fn stall(&mut self, dir: Direction) {
            match dir {
                Direction::In => self.stalled_in = true,
                Direction::Out => self.stalled_out = true,
            }
        }

        fn is_stall_requested(&mut self, dir: Direction) -> bool {
            match dir {
                Direction::In => self.stalled_in,
                Direction::Out => self.stalled_out,
            }
        }

        fn set_autoswitch(&mut self, dir: Direction, enable: bool) {
            match dir {
                Direction::In => self.autoswitch_in = enable,
                Direction::Out => self.autoswitch_out = enable,
            }
        }

        unsafe fn start_in_dma(&mut self, ram: *const u8, len: usize) -> Result<(), EndpointError> {
            let data = unsafe { core::slice::from_raw_parts(ram, len) };
            if !self.stuck_in {
                self.in_packets.push(data.to_vec());
            }
            self.dma_log.push((Direction::In, len));
            self.dma_started();
            Ok(())
        }

        unsafe fn start_out_dma(&mut self, ram: *mut u8, len: usize) -> Result<(), EndpointError> {
            let buf = unsafe { core::slice::from_raw_parts_mut(ram, len) };
            let mut filled = 0;
            while filled < len {
                let Some(packet) = self.out_packets.pop_front() else {
                    return Err(EndpointError::Timeout);
                };
                buf[filled..filled + packet.len()].copy_from_slice(&packet);
                filled += packet.len();
            }
            self.dma_log.push((Direction::Out, len));
            self.dma_started();
            Ok(())
        }

        fn is_dma_complete(&mut self, dir: Direction) -> bool {
            if dir == Direction::In && self.stuck_in {
                return false;
            }
            if self.dma_countdown > 0 {
                self.dma_countdown -= 1;
                return false;
            }
            if core::mem::take(&mut self.dma_active) {
                if let Some(trace) = &self.trace {
                    trace.borrow_mut().push(DmaEvent::UsbDone);
                }
            }
            true
        }
    }

    #[test]
    fn setup_packet_decoding() {
        let setup = SetupPacket::from_bytes(&[0xA1, 0xFE, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00]);
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.kind(), Some(RequestType::Class));
        assert_eq!(setup.recipient(), Some(Recipient::Interface));
        assert_eq!(setup.request, 0xFE);
        assert_eq!(setup.index, 2);
        assert_eq!(setup.length, 1);
        let setup = SetupPacket::from_bytes(&[0x21, 0xFF, 0, 0, 0, 0, 0, 0]);
        assert_eq!(setup.direction(), Direction::Out);
        assert_eq!(setup.kind(), Some(RequestType::Class));
    }

    #[test]
    fn data_is_split_into_packets() {
        let mut ep = MockEndpoints::new(64);
        let data: Vec<u8> = (0..150).map(|v| v as u8).collect();
        assert_eq!(write_in_data(&mut ep, &data).unwrap(), 150);
        assert_eq!(ep.in_packets.len(), 3);
        assert_eq!(ep.in_packets[2].len(), 22);
        assert_eq!(ep.in_data(), data);

        ep.push_out(&data);
        let mut buf = [0u8; 150];
        assert_eq!(read_out_data(&mut ep, &mut buf).unwrap(), 150);
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn disabled_endpoint_aborts() {
        let mut ep = MockEndpoints::new(64);
        ep.enabled = false;
        assert_eq!(write_in_data(&mut ep, &[1, 2, 3]), Err(EndpointError::Disabled));
        let mut buf = [0u8; 4];
        assert_eq!(read_out_data(&mut ep, &mut buf), Err(EndpointError::Disabled));
    }
}
