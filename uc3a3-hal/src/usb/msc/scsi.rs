//! SCSI block command decoder.
//!
//! Handles the command block of one CBW, runs the data stage on the bulk endpoints and records
//! the command status and sense data for the following REQUEST SENSE.
use super::MscConfig;
use super::bot::{CommandBlockWrapper, CommandStatus};
use crate::ctrl_access::{CtrlError, MemoryAccess};
use crate::sd_mmc::SECTOR_SIZE;
use crate::usb::{self, BulkEndpoints, Direction};

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const VERIFY_10: u8 = 0x2F;
    pub const MODE_SENSE_10: u8 = 0x5A;
}

pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
}

pub mod asc {
    pub const NO_ADDITIONAL_SENSE_INFORMATION: u8 = 0x00;
    pub const INVALID_COMMAND_OPERATION_CODE: u8 = 0x20;
    pub const LBA_OUT_OF_RANGE: u8 = 0x21;
    pub const INVALID_FIELD_IN_CDB: u8 = 0x24;
    pub const WRITE_PROTECTED: u8 = 0x27;
    pub const NOT_READY_TO_READY_CHANGE: u8 = 0x28;
    pub const MEDIUM_NOT_PRESENT: u8 = 0x3A;
}

const REQUEST_SENSE_LEN: usize = 18;
const INQUIRY_LEN: usize = 36;
const READ_CAPACITY_LEN: usize = 8;
const PAGE_CODE_MASK: u8 = 0x3F;
const PAGE_READ_WRITE_ERROR_RECOVERY: u8 = 0x01;
const PAGE_INFORMATIONAL_EXCEPTIONS: u8 = 0x1C;
const PAGE_ALL: u8 = 0x3F;
const READ_WRITE_ERROR_RECOVERY_PAGE: [u8; 12] =
    [0x01, 0x0A, 0x80, 0x03, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00];
const INFORMATIONAL_EXCEPTIONS_PAGE: [u8; 12] =
    [0x1C, 0x0A, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
const WRITE_PROTECT_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

pub struct ScsiDecoder {
    config: MscConfig,
    status: CommandStatus,
    sense: Sense,
    data_remaining: u32,
}

impl ScsiDecoder {
    pub const fn new(config: MscConfig) -> Self {
        Self {
            config,
            status: CommandStatus::Passed,
            sense: Sense {
                key: sense_key::NO_SENSE,
                asc: asc::NO_ADDITIONAL_SENSE_INFORMATION,
                ascq: 0,
            },
            data_remaining: 0,
        }
    }

    #[inline]
    pub fn status(&self) -> CommandStatus {
        self.status
    }

    #[inline]
    pub fn sense(&self) -> Sense {
        self.sense
    }

    /// Bytes of the data stage not transferred yet.
    #[inline]
    pub fn data_remaining(&self) -> u32 {
        self.data_remaining
    }

    pub fn clear_sense(&mut self) {
        self.sense = Sense::default();
    }

    /// Run the command of `cbw` against logical unit `lun`. Returns false if the data stage was
    /// not completed, in which case the endpoint of the data stage should be stalled.
    pub fn decode(
        &mut self,
        cbw: &CommandBlockWrapper,
        lun: u8,
        ep: &mut dyn BulkEndpoints,
        memory: &mut MemoryAccess,
    ) -> bool {
        self.data_remaining = cbw.data_transfer_length;
        log::trace!("SCSI opcode {:#04x} LUN {lun}", cbw.opcode());
        match cbw.opcode() {
            opcode::TEST_UNIT_READY => {
                match memory.test_unit_ready(lun) {
                    Ok(()) => self.good(),
                    Err(e) => self.ctrl_error(e),
                }
                true
            }
            opcode::REQUEST_SENSE => self.request_sense(cbw, ep),
            opcode::INQUIRY => self.inquiry(cbw, ep),
            opcode::MODE_SENSE_6 => self.mode_sense(cbw, false, lun, ep, memory),
            opcode::MODE_SENSE_10 => self.mode_sense(cbw, true, lun, ep, memory),
            opcode::PREVENT_ALLOW_MEDIUM_REMOVAL | opcode::VERIFY_10 => {
                self.good();
                true
            }
            opcode::READ_CAPACITY_10 => self.read_capacity(lun, ep, memory),
            opcode::READ_10 => self.read_10(cbw, lun, ep, memory),
            opcode::WRITE_10 => self.write_10(cbw, lun, ep, memory),
            // Linux does not mount the disk if this command is rejected.
            opcode::START_STOP_UNIT => false,
            _ => {
                self.failed(
                    sense_key::ILLEGAL_REQUEST,
                    asc::INVALID_COMMAND_OPERATION_CODE,
                );
                false
            }
        }
    }

    fn build_sense(&mut self, key: u8, asc: u8) {
        self.sense = Sense { key, asc, ascq: 0 };
    }

    fn failed(&mut self, key: u8, asc: u8) {
        self.status = CommandStatus::Failed;
        self.build_sense(key, asc);
    }

    fn good(&mut self) {
        self.status = CommandStatus::Passed;
        self.build_sense(sense_key::NO_SENSE, asc::NO_ADDITIONAL_SENSE_INFORMATION);
    }

    fn not_present(&mut self) {
        self.failed(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT);
    }

    fn busy_or_change(&mut self) {
        self.failed(sense_key::UNIT_ATTENTION, asc::NOT_READY_TO_READY_CHANGE);
    }

    fn fail(&mut self) {
        self.failed(
            sense_key::HARDWARE_ERROR,
            asc::NO_ADDITIONAL_SENSE_INFORMATION,
        );
    }

    fn protected(&mut self) {
        self.failed(sense_key::DATA_PROTECT, asc::WRITE_PROTECTED);
    }

    fn cdb_field(&mut self) {
        self.failed(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB);
    }

    /// The host expects data in the other direction than the command moves it.
    fn phase_error(&mut self) {
        self.cdb_field();
        self.status = CommandStatus::PhaseError;
    }

    /// Check that `sectors` sectors starting at `lba` exist on the unit.
    fn in_range(&mut self, lun: u8, memory: &mut MemoryAccess, lba: u32, sectors: u32) -> bool {
        let last_lba = match memory.read_capacity(lun) {
            Ok(last_lba) => last_lba,
            Err(e) => {
                self.ctrl_error(e);
                return false;
            }
        };
        if lba as u64 + sectors as u64 > last_lba as u64 + 1 {
            self.failed(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE);
            return false;
        }
        true
    }

    fn ctrl_error(&mut self, e: CtrlError) {
        match e {
            CtrlError::NotPresent => self.not_present(),
            CtrlError::Busy => self.busy_or_change(),
            CtrlError::Fail => self.fail(),
        }
    }

    /// Send data on the IN endpoint and wait until the host fetched it. The data is cut to
    /// the length the host expects.
    fn send(&mut self, ep: &mut dyn BulkEndpoints, data: &[u8]) -> bool {
        let len = data.len().min(self.data_remaining as usize);
        let result = usb::write_in_data(ep, &data[..len])
            .and_then(|sent| usb::wait_drained(ep, Direction::In).map(|_| sent));
        match result {
            Ok(sent) => {
                self.data_remaining -= sent as u32;
                true
            }
            Err(e) => {
                log::debug!("SCSI data stage failed: {e}");
                false
            }
        }
    }

    fn request_sense(&mut self, cbw: &CommandBlockWrapper, ep: &mut dyn BulkEndpoints) -> bool {
        let allocation = (cbw.cdb[4] as usize).min(REQUEST_SENSE_LEN);
        if allocation != 0 {
            let mut data = [0u8; REQUEST_SENSE_LEN];
            data[0] = 0x70;
            data[2] = self.sense.key;
            data[7] = 0x0A;
            data[12] = self.sense.asc;
            data[13] = self.sense.ascq;
            if !self.send(ep, &data[..allocation]) {
                return false;
            }
        }
        self.good();
        allocation == cbw.cdb[4] as usize
    }

    fn inquiry(&mut self, cbw: &CommandBlockWrapper, ep: &mut dyn BulkEndpoints) -> bool {
        // Vital product data pages are not supported.
        if cbw.cdb[1] & 0x03 != 0 || cbw.cdb[2] != 0 {
            self.cdb_field();
            return false;
        }
        let allocation = (cbw.cdb[4] as usize).min(INQUIRY_LEN);
        if allocation != 0 {
            let mut data = [0u8; INQUIRY_LEN];
            data[..8].copy_from_slice(&[0x00, 0x80, 0x00, 0x02, 0x1F, 0x00, 0x00, 0x00]);
            data[8..16].copy_from_slice(self.config.vendor_id());
            data[16..32].copy_from_slice(self.config.product_id());
            data[32..36].copy_from_slice(self.config.revision());
            if !self.send(ep, &data[..allocation]) {
                return false;
            }
        }
        self.good();
        allocation == cbw.cdb[4] as usize
    }

    fn mode_sense(
        &mut self,
        cbw: &CommandBlockWrapper,
        ten: bool,
        lun: u8,
        ep: &mut dyn BulkEndpoints,
        memory: &mut MemoryAccess,
    ) -> bool {
        let allocation = if ten {
            u16::from_be_bytes([cbw.cdb[7], cbw.cdb[8]]) as usize
        } else {
            cbw.cdb[4] as usize
        };
        let header_len = if ten { 8 } else { 4 };
        let mut data = [0u8; 8 + 24];
        let mut total = header_len;
        let mut append = |page: &[u8; 12]| {
            data[total..total + page.len()].copy_from_slice(page);
            total += page.len();
        };
        match cbw.cdb[2] & PAGE_CODE_MASK {
            PAGE_READ_WRITE_ERROR_RECOVERY => append(&READ_WRITE_ERROR_RECOVERY_PAGE),
            PAGE_INFORMATIONAL_EXCEPTIONS => append(&INFORMATIONAL_EXCEPTIONS_PAGE),
            PAGE_ALL => {
                append(&READ_WRITE_ERROR_RECOVERY_PAGE);
                append(&INFORMATIONAL_EXCEPTIONS_PAGE);
            }
            _ => {
                self.cdb_field();
                return false;
            }
        }
        let device_specific = if memory.write_protected(lun) {
            WRITE_PROTECT_BIT
        } else {
            0
        };
        // Medium type and block descriptor length stay zero.
        if ten {
            data[0..2].copy_from_slice(&((total - 2) as u16).to_be_bytes());
            data[3] = device_specific;
        } else {
            data[0] = (total - 1) as u8;
            data[2] = device_specific;
        }
        let len = allocation.min(total);
        if len != 0 && !self.send(ep, &data[..len]) {
            return false;
        }
        self.good();
        true
    }

    fn read_capacity(
        &mut self,
        lun: u8,
        ep: &mut dyn BulkEndpoints,
        memory: &mut MemoryAccess,
    ) -> bool {
        match memory.read_capacity(lun) {
            Ok(last_lba) => {
                let mut data = [0u8; READ_CAPACITY_LEN];
                data[..4].copy_from_slice(&last_lba.to_be_bytes());
                data[4..].copy_from_slice(&(SECTOR_SIZE as u32).to_be_bytes());
                if !self.send(ep, &data) {
                    return false;
                }
                self.good();
                true
            }
            Err(e) => {
                self.ctrl_error(e);
                false
            }
        }
    }

    fn read_10(
        &mut self,
        cbw: &CommandBlockWrapper,
        lun: u8,
        ep: &mut dyn BulkEndpoints,
        memory: &mut MemoryAccess,
    ) -> bool {
        let (lba, count) = block_range(cbw);
        if self.data_remaining == 0 {
            self.zero_length_result(count);
            return true;
        }
        if cbw.direction != Direction::In {
            self.phase_error();
            return false;
        }
        let sectors = self.data_remaining / SECTOR_SIZE as u32;
        if !self.in_range(lun, memory, lba, sectors) {
            return false;
        }
        match memory.read_to_usb(lun, ep, lba, sectors) {
            Ok(()) => self.transfer_done(count, sectors),
            Err(e) => {
                self.ctrl_error(e);
                false
            }
        }
    }

    fn write_10(
        &mut self,
        cbw: &CommandBlockWrapper,
        lun: u8,
        ep: &mut dyn BulkEndpoints,
        memory: &mut MemoryAccess,
    ) -> bool {
        let (lba, count) = block_range(cbw);
        if self.data_remaining == 0 {
            self.zero_length_result(count);
            return true;
        }
        if cbw.direction != Direction::Out {
            self.phase_error();
            return false;
        }
        if memory.write_protected(lun) {
            self.protected();
            return false;
        }
        let sectors = self.data_remaining / SECTOR_SIZE as u32;
        if !self.in_range(lun, memory, lba, sectors) {
            return false;
        }
        match memory.write_from_usb(lun, ep, lba, sectors) {
            Ok(()) => self.transfer_done(count, sectors),
            Err(e) => {
                self.ctrl_error(e);
                false
            }
        }
    }

    fn zero_length_result(&mut self, count: u16) {
        if count == 0 {
            self.good();
        } else {
            self.cdb_field();
        }
    }

    fn transfer_done(&mut self, count: u16, sectors: u32) -> bool {
        if count as u32 == sectors {
            self.good();
        } else {
            self.cdb_field();
        }
        self.data_remaining = 0;
        true
    }
}

/// Logical block address and block count of a READ(10) or WRITE(10) command.
fn block_range(cbw: &CommandBlockWrapper) -> (u32, u16) {
    let cdb = &cbw.cdb;
    (
        u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]),
        u16::from_be_bytes([cdb[7], cdb[8]]),
    )
}
