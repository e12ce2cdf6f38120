//! # USB mass storage class
//!
//! [MassStorage] runs the Bulk-Only Transport on a bulk endpoint pair and hands the SCSI command
//! blocks to [scsi::ScsiDecoder], which accesses the media through
//! [MemoryAccess](crate::ctrl_access::MemoryAccess).
//!
//! ## Example
//!
//! ```ignore
//! let mut msc = MassStorage::new(MscConfig::new(*b"VENDOR  ", *b"SD/MMC card     ", *b"1.00"));
//! loop {
//!     if usb.take_bus_reset() {
//!         msc.reset();
//!     }
//!     msc.control(&mut usb, memory.nb_luns()).ok();
//!     msc.task(&mut usb.bulk(1, 2).unwrap(), &mut memory);
//! }
//! ```
pub mod bot;
pub mod scsi;

use bot::{CBW_LEN, CommandBlockWrapper, CommandStatus, CommandStatusWrapper};
use scsi::ScsiDecoder;

use super::device::UsbDevice;
use super::{BulkEndpoints, Direction, EndpointError, SetupPacket};
use crate::ctrl_access::MemoryAccess;

pub const REQUEST_GET_MAX_LUN: u8 = 0xFE;
pub const REQUEST_BULK_ONLY_RESET: u8 = 0xFF;
/// Class request, interface recipient, device to host.
const REQUEST_TYPE_CLASS_IN: u8 = 0xA1;
/// Class request, interface recipient, host to device.
const REQUEST_TYPE_CLASS_OUT: u8 = 0x21;
/// Room for a CBW in a full speed or high speed bulk packet.
const CBW_BUF_LEN: usize = 64;

/// Identification strings returned by INQUIRY and the LUN used before the host asked for the
/// number of LUNs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MscConfig {
    vendor_id: [u8; 8],
    product_id: [u8; 16],
    revision: [u8; 4],
    default_lun: u8,
}

impl MscConfig {
    pub const fn new(vendor_id: [u8; 8], product_id: [u8; 16], revision: [u8; 4]) -> Self {
        Self {
            vendor_id,
            product_id,
            revision,
            default_lun: 0,
        }
    }

    pub const fn with_default_lun(mut self, lun: u8) -> Self {
        self.default_lun = lun;
        self
    }

    #[inline]
    pub const fn vendor_id(&self) -> &[u8; 8] {
        &self.vendor_id
    }

    #[inline]
    pub const fn product_id(&self) -> &[u8; 16] {
        &self.product_id
    }

    #[inline]
    pub const fn revision(&self) -> &[u8; 4] {
        &self.revision
    }

    #[inline]
    pub const fn default_lun(&self) -> u8 {
        self.default_lun
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    WaitCbw,
    WaitStallCleared,
    SendCsw,
    WaitCswSent,
    /// Both bulk endpoints stay stalled until a Bulk-Only Mass Storage Reset.
    WaitResetRecovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassResponse {
    /// Answer the data stage with the highest LUN.
    MaxLun(u8),
    /// Complete the request with a zero length status stage.
    StatusStage,
    /// The caller stalls the control endpoint.
    Unsupported,
}

pub struct MassStorage {
    config: MscConfig,
    state: BotState,
    decoder: ScsiDecoder,
    tag: u32,
    direction: Direction,
    lun: u8,
    multiple_drive: bool,
}

impl MassStorage {
    pub const fn new(config: MscConfig) -> Self {
        Self {
            config,
            state: BotState::WaitCbw,
            decoder: ScsiDecoder::new(config),
            tag: 0,
            direction: Direction::Out,
            lun: 0,
            multiple_drive: false,
        }
    }

    #[inline]
    pub fn state(&self) -> BotState {
        self.state
    }

    #[inline]
    pub fn decoder(&self) -> &ScsiDecoder {
        &self.decoder
    }

    /// LUN of the last command.
    #[inline]
    pub fn lun(&self) -> u8 {
        self.lun
    }

    #[inline]
    pub fn multiple_drive(&self) -> bool {
        self.multiple_drive
    }

    /// Restart the transport, e.g. after a bus reset or a Bulk-Only Mass Storage Reset.
    pub fn reset(&mut self) {
        self.state = BotState::WaitCbw;
        self.decoder.clear_sense();
    }

    /// Advance the transport by one step.
    pub fn task(&mut self, ep: &mut dyn BulkEndpoints, memory: &mut MemoryAccess) {
        match self.state {
            BotState::WaitCbw => self.receive_cbw(ep, memory),
            BotState::WaitStallCleared => {
                if ep.is_stall_requested(Direction::In) || ep.is_stall_requested(Direction::Out)
                {
                    return;
                }
                drain_out(ep);
                self.state = BotState::SendCsw;
            }
            BotState::SendCsw => {
                drain_out(ep);
                if !ep.in_ready() {
                    return;
                }
                let csw = CommandStatusWrapper {
                    tag: self.tag,
                    residue: self.decoder.data_remaining(),
                    status: self.decoder.status(),
                };
                if csw.status != CommandStatus::Passed {
                    log::debug!(
                        "command {:#x} failed: {:?}",
                        csw.tag,
                        self.decoder.sense()
                    );
                }
                ep.write_in_packet(&csw.to_bytes());
                ep.send_in();
                self.state = BotState::WaitCswSent;
            }
            BotState::WaitCswSent => {
                if ep.busy_banks(Direction::In) == 0 {
                    self.state = BotState::WaitCbw;
                }
            }
            BotState::WaitResetRecovery => (),
        }
    }

    fn receive_cbw(&mut self, ep: &mut dyn BulkEndpoints, memory: &mut MemoryAccess) {
        if !ep.out_received() {
            return;
        }
        let mut raw = [0u8; CBW_BUF_LEN];
        let len = ep.read_out_packet(&mut raw);
        ep.ack_out();
        let cbw = match CommandBlockWrapper::parse(&raw[..len]) {
            Ok(cbw) => cbw,
            Err(e) => {
                log::warn!("{e}, waiting for reset recovery");
                ep.stall(Direction::In);
                ep.stall(Direction::Out);
                self.state = BotState::WaitResetRecovery;
                return;
            }
        };
        self.tag = cbw.tag;
        self.direction = cbw.direction;
        self.lun = if self.multiple_drive {
            cbw.lun
        } else {
            self.config.default_lun()
        };
        if !self.decoder.decode(&cbw, self.lun, ep, memory) && self.decoder.data_remaining() != 0
        {
            log::debug!(
                "stalling {:?} data stage, {} bytes left",
                self.direction,
                self.decoder.data_remaining()
            );
            ep.stall(self.direction);
        }
        self.state = BotState::WaitStallCleared;
    }

    /// Handle a class specific control request.
    pub fn handle_class_request(&mut self, setup: &SetupPacket, nb_luns: u8) -> ClassResponse {
        match (setup.request, setup.request_type) {
            (REQUEST_GET_MAX_LUN, REQUEST_TYPE_CLASS_IN) if setup.value == 0 && setup.length == 1 => {
                self.multiple_drive = true;
                ClassResponse::MaxLun(nb_luns.saturating_sub(1))
            }
            (REQUEST_BULK_ONLY_RESET, REQUEST_TYPE_CLASS_OUT)
                if setup.value == 0 && setup.length == 0 =>
            {
                self.reset();
                ClassResponse::StatusStage
            }
            _ => ClassResponse::Unsupported,
        }
    }

    /// Serve a pending class request on the control endpoint of `usb`. Returns the request if
    /// it is not a mass storage class request, so the caller can handle it.
    pub fn control(
        &mut self,
        usb: &mut UsbDevice,
        nb_luns: u8,
    ) -> Result<Option<SetupPacket>, EndpointError> {
        if !usb.is_setup_received() {
            return Ok(None);
        }
        let setup = usb.read_setup();
        match self.handle_class_request(&setup, nb_luns) {
            ClassResponse::MaxLun(max_lun) => {
                usb.write_control_in(&[max_lun])?;
                usb.wait_control_zlp_out()?;
            }
            ClassResponse::StatusStage => usb.send_control_zlp()?,
            ClassResponse::Unsupported => return Ok(Some(setup)),
        }
        Ok(None)
    }
}

/// Discard OUT packets the host sent beyond the announced data length.
fn drain_out(ep: &mut dyn BulkEndpoints) {
    while ep.out_received() {
        ep.ack_out();
    }
}

const _: () = assert!(CBW_LEN <= CBW_BUF_LEN);

#[cfg(test)]
mod tests {
    extern crate std;

    use super::bot::tests::cbw;
    use super::*;
    use crate::ctrl_access::RamDisk;
    use crate::sd_mmc::SECTOR_SIZE;
    use crate::usb::msc::scsi::{asc, opcode, sense_key};
    use crate::usb::tests::MockEndpoints;
    use std::vec;

    const CONFIG: MscConfig = MscConfig::new(*b"VENDOR  ", *b"SD/MMC card     ", *b"1.00");

    fn step_until_idle(
        msc: &mut MassStorage,
        ep: &mut MockEndpoints,
        memory: &mut MemoryAccess,
    ) {
        for _ in 0..8 {
            msc.task(ep, memory);
            if msc.state() == BotState::WaitCbw && !ep.out_received() {
                return;
            }
        }
    }

    fn csw_of(ep: &MockEndpoints) -> &[u8] {
        ep.in_packets.last().unwrap()
    }

    #[test]
    fn read_command_flow() {
        let mut mem = vec![0x5Au8; 2 * SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem);
        let mut memory = MemoryAccess::new();
        assert!(memory.add(&mut disk).is_ok());
        let mut msc = MassStorage::new(CONFIG);
        let mut ep = MockEndpoints::new(512);

        ep.push_out(&cbw(
            0x11,
            512,
            Direction::In,
            0,
            &[opcode::READ_10, 0, 0, 0, 0, 1, 0, 0, 1, 0],
        ));
        msc.task(&mut ep, &mut memory);
        assert_eq!(msc.state(), BotState::WaitStallCleared);
        step_until_idle(&mut msc, &mut ep, &mut memory);
        assert_eq!(msc.state(), BotState::WaitCbw);

        assert_eq!(ep.in_packets.len(), 2);
        assert!(ep.in_packets[0].iter().all(|b| *b == 0x5A));
        assert_eq!(
            csw_of(&ep),
            &[0x55, 0x53, 0x42, 0x53, 0x11, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn failed_data_stage_stalls() {
        let mut mem = vec![0u8; SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem);
        let mut memory = MemoryAccess::new();
        assert!(memory.add(&mut disk).is_ok());
        let mut msc = MassStorage::new(CONFIG);
        let mut ep = MockEndpoints::new(64);

        ep.push_out(&cbw(0x22, 512, Direction::In, 0, &[0xC0, 0, 0, 0, 0, 0]));
        msc.task(&mut ep, &mut memory);
        assert!(ep.stalled_in);
        assert!(!ep.stalled_out);
        msc.task(&mut ep, &mut memory);
        assert_eq!(msc.state(), BotState::WaitStallCleared);

        // Host clears the halt feature.
        ep.stalled_in = false;
        step_until_idle(&mut msc, &mut ep, &mut memory);
        let csw = csw_of(&ep);
        assert_eq!(&csw[4..8], &0x22u32.to_le_bytes());
        assert_eq!(&csw[8..12], &512u32.to_le_bytes());
        assert_eq!(csw[12], CommandStatus::Failed as u8);
        assert_eq!(
            msc.decoder().sense().asc,
            asc::INVALID_COMMAND_OPERATION_CODE
        );
    }

    #[test]
    fn stuck_host_fails_read() {
        let mut mem = vec![0x5Au8; SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem);
        let mut memory = MemoryAccess::new();
        assert!(memory.add(&mut disk).is_ok());
        let mut msc = MassStorage::new(CONFIG);
        let mut ep = MockEndpoints::new(512);
        ep.stuck_in = true;

        let read = [opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        ep.push_out(&cbw(0x44, 512, Direction::In, 0, &read));
        msc.task(&mut ep, &mut memory);
        assert!(ep.stalled_in);
        assert!(ep.in_packets.is_empty());
        assert_eq!(msc.decoder().sense().key, sense_key::HARDWARE_ERROR);

        ep.stuck_in = false;
        ep.stalled_in = false;
        step_until_idle(&mut msc, &mut ep, &mut memory);
        let csw = csw_of(&ep);
        assert_eq!(&csw[8..12], &512u32.to_le_bytes());
        assert_eq!(csw[12], CommandStatus::Failed as u8);
    }

    #[test]
    fn direction_mismatch_is_phase_error() {
        let mut mem = vec![0u8; SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem);
        let mut memory = MemoryAccess::new();
        assert!(memory.add(&mut disk).is_ok());
        let mut msc = MassStorage::new(CONFIG);
        let mut ep = MockEndpoints::new(512);

        let read = [opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        ep.push_out(&cbw(0x55, 512, Direction::Out, 0, &read));
        msc.task(&mut ep, &mut memory);
        assert!(ep.stalled_out);
        assert!(!ep.stalled_in);

        ep.stalled_out = false;
        step_until_idle(&mut msc, &mut ep, &mut memory);
        assert_eq!(csw_of(&ep)[12], CommandStatus::PhaseError as u8);
    }

    #[test]
    fn invalid_cbw_needs_reset_recovery() {
        let mut memory = MemoryAccess::new();
        let mut msc = MassStorage::new(CONFIG);
        let mut ep = MockEndpoints::new(64);

        let mut raw = cbw(0x33, 0, Direction::Out, 0, &[opcode::TEST_UNIT_READY; 6]);
        raw[3] = 0;
        ep.push_out(&raw);
        msc.task(&mut ep, &mut memory);
        assert_eq!(msc.state(), BotState::WaitResetRecovery);
        assert!(ep.stalled_in && ep.stalled_out);
        assert!(ep.out_packets.is_empty());

        // No CSW until the host resets the transport.
        ep.stalled_in = false;
        ep.stalled_out = false;
        msc.task(&mut ep, &mut memory);
        assert!(ep.in_packets.is_empty());

        let reset = SetupPacket::from_bytes(&[0x21, 0xFF, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            msc.handle_class_request(&reset, 1),
            ClassResponse::StatusStage
        );
        assert_eq!(msc.state(), BotState::WaitCbw);
    }

    #[test]
    fn default_lun_until_max_lun_requested() {
        let mut first = vec![0x01u8; SECTOR_SIZE];
        let mut second = vec![0x02u8; SECTOR_SIZE];
        let mut disk0 = RamDisk::new(&mut first);
        let mut disk1 = RamDisk::new(&mut second);
        let mut memory = MemoryAccess::new();
        assert!(memory.add(&mut disk0).is_ok());
        assert!(memory.add(&mut disk1).is_ok());
        let mut msc = MassStorage::new(CONFIG.with_default_lun(0));
        let mut ep = MockEndpoints::new(512);
        let read = [opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 1, 0];

        ep.push_out(&cbw(1, 512, Direction::In, 1, &read));
        step_until_idle(&mut msc, &mut ep, &mut memory);
        assert_eq!(msc.lun(), 0);
        assert!(ep.in_packets[0].iter().all(|b| *b == 0x01));

        let get_max_lun = SetupPacket::from_bytes(&[0xA1, 0xFE, 0, 0, 0, 0, 1, 0]);
        assert_eq!(
            msc.handle_class_request(&get_max_lun, memory.nb_luns()),
            ClassResponse::MaxLun(1)
        );
        assert!(msc.multiple_drive());

        ep.in_packets.clear();
        ep.push_out(&cbw(2, 512, Direction::In, 1, &read));
        step_until_idle(&mut msc, &mut ep, &mut memory);
        assert_eq!(msc.lun(), 1);
        assert!(ep.in_packets[0].iter().all(|b| *b == 0x02));
    }

    #[test]
    fn write_command_flow() {
        let mut mem = vec![0u8; 2 * SECTOR_SIZE];
        let mut msc = MassStorage::new(CONFIG);
        let mut ep = MockEndpoints::new(512);
        {
            let mut disk = RamDisk::new(&mut mem);
            let mut memory = MemoryAccess::new();
            assert!(memory.add(&mut disk).is_ok());
            ep.push_out(&cbw(
                3,
                512,
                Direction::Out,
                0,
                &[opcode::WRITE_10, 0, 0, 0, 0, 1, 0, 0, 1, 0],
            ));
            ep.push_out(&[0x77; SECTOR_SIZE]);
            step_until_idle(&mut msc, &mut ep, &mut memory);
        }
        assert!(mem[SECTOR_SIZE..].iter().all(|b| *b == 0x77));
        assert!(mem[..SECTOR_SIZE].iter().all(|b| *b == 0));
        assert_eq!(csw_of(&ep)[12], CommandStatus::Passed as u8);
    }

    #[test]
    fn unsupported_class_requests() {
        let mut msc = MassStorage::new(CONFIG);
        let setup = SetupPacket::from_bytes(&[0xA1, 0xFE, 0, 0, 0, 0, 2, 0]);
        assert_eq!(msc.handle_class_request(&setup, 1), ClassResponse::Unsupported);
        let setup = SetupPacket::from_bytes(&[0x80, 0x06, 0, 1, 0, 0, 18, 0]);
        assert_eq!(msc.handle_class_request(&setup, 1), ClassResponse::Unsupported);
        assert!(!msc.multiple_drive());
    }
}
