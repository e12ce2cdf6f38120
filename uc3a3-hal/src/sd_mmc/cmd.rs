//! SD/MMC command set.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    None,
    /// Normal 48-bit response.
    R1,
    /// R1 with busy signalling on DAT0.
    R1b,
    /// 136-bit CID or CSD.
    R2,
    /// OCR, without CRC.
    R3,
    /// Published RCA.
    R6,
    /// Card interface condition.
    R7,
}

impl Response {
    #[inline]
    pub const fn is_present(&self) -> bool {
        !matches!(self, Response::None)
    }

    #[inline]
    pub const fn is_136_bit(&self) -> bool {
        matches!(self, Response::R2)
    }

    #[inline]
    pub const fn has_busy(&self) -> bool {
        matches!(self, Response::R1b)
    }

    #[inline]
    pub const fn has_crc(&self) -> bool {
        !matches!(self, Response::None | Response::R3)
    }
}

/// Data phase started or stopped by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTransfer {
    None,
    ReadSingle,
    ReadMultiple,
    WriteSingle,
    WriteMultiple,
    Stop,
}

impl DataTransfer {
    #[inline]
    pub const fn is_read(&self) -> bool {
        matches!(self, DataTransfer::ReadSingle | DataTransfer::ReadMultiple)
    }

    #[inline]
    pub const fn is_write(&self) -> bool {
        matches!(self, DataTransfer::WriteSingle | DataTransfer::WriteMultiple)
    }

    #[inline]
    pub const fn is_multiple(&self) -> bool {
        matches!(
            self,
            DataTransfer::ReadMultiple | DataTransfer::WriteMultiple
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub response: Response,
    pub data: DataTransfer,
    pub open_drain: bool,
    /// Send the 74 clock cycles initialization sequence instead of a command.
    pub init_sequence: bool,
}

impl Command {
    pub const fn new(index: u8, response: Response) -> Self {
        Self {
            index,
            response,
            data: DataTransfer::None,
            open_drain: false,
            init_sequence: false,
        }
    }

    pub const fn with_data(mut self, data: DataTransfer) -> Self {
        self.data = data;
        self
    }

    pub const fn with_open_drain(mut self) -> Self {
        self.open_drain = true;
        self
    }

    pub const fn with_init_sequence(mut self) -> Self {
        self.init_sequence = true;
        self
    }
}

pub const INIT_SEQUENCE: Command = Command::new(0, Response::None)
    .with_open_drain()
    .with_init_sequence();
pub const GO_IDLE_STATE: Command = Command::new(0, Response::None).with_open_drain();
pub const MMC_SEND_OP_COND: Command = Command::new(1, Response::R3).with_open_drain();
pub const ALL_SEND_CID: Command = Command::new(2, Response::R2).with_open_drain();
pub const SET_RELATIVE_ADDR: Command = Command::new(3, Response::R6);
pub const SD_SWITCH_FUNC: Command =
    Command::new(6, Response::R1).with_data(DataTransfer::ReadSingle);
pub const MMC_SWITCH: Command = Command::new(6, Response::R1b);
pub const SELECT_CARD: Command = Command::new(7, Response::R1b);
/// Deselect all cards. The deselected card does not answer.
pub const DESELECT_CARD: Command = Command::new(7, Response::None);
pub const SD_SEND_IF_COND: Command = Command::new(8, Response::R7);
pub const MMC_SEND_EXT_CSD: Command =
    Command::new(8, Response::R1).with_data(DataTransfer::ReadSingle);
pub const SEND_CSD: Command = Command::new(9, Response::R2);
pub const STOP_READ_TRANSMISSION: Command =
    Command::new(12, Response::R1).with_data(DataTransfer::Stop);
pub const STOP_WRITE_TRANSMISSION: Command =
    Command::new(12, Response::R1b).with_data(DataTransfer::Stop);
pub const SEND_STATUS: Command = Command::new(13, Response::R1);
pub const SET_BLOCKLEN: Command = Command::new(16, Response::R1);
pub const READ_SINGLE_BLOCK: Command =
    Command::new(17, Response::R1).with_data(DataTransfer::ReadSingle);
pub const READ_MULTIPLE_BLOCK: Command =
    Command::new(18, Response::R1).with_data(DataTransfer::ReadMultiple);
pub const WRITE_BLOCK: Command =
    Command::new(24, Response::R1).with_data(DataTransfer::WriteSingle);
pub const WRITE_MULTIPLE_BLOCK: Command =
    Command::new(25, Response::R1).with_data(DataTransfer::WriteMultiple);
pub const LOCK_UNLOCK: Command =
    Command::new(42, Response::R1).with_data(DataTransfer::WriteSingle);
pub const APP_CMD: Command = Command::new(55, Response::R1);
pub const SD_SET_BUS_WIDTH: Command = Command::new(6, Response::R1);
pub const SD_SEND_OP_COND: Command = Command::new(41, Response::R3);

/// Arguments and register masks.
pub mod arg {
    pub const OCR_BUSY: u32 = 0x8000_0000;
    pub const OCR_HC: u32 = 0x4000_0000;
    pub const OCR_VOLTAGE_3_2V_3_3V: u32 = 0x0010_0000;
    pub const OCR_VOLTAGE_ALL: u32 = 0x00FF_8000;

    pub const IF_COND_CHECK: u32 = 0x0000_01AA;

    pub const RCA_RESERVE: u32 = 0x0000_0000;
    pub const RCA_MASK: u32 = 0xFFFF_0000;
    /// Relative card address assigned to MMC cards.
    pub const RCA_DEFAULT: u32 = 0x0001_FFFF;

    /// SD bus width argument for ACMD6.
    pub const SD_BUS_4_BIT: u32 = 2;

    const MMC_SWITCH_WRITE: u32 = 3;
    const MMC_SWITCH_BUS_WIDTH: u32 = 183;
    const MMC_SWITCH_HIGH_SPEED: u32 = 185;
    const MMC_SWITCH_VAL_4BIT: u32 = 1;
    const MMC_SWITCH_VAL_8BIT: u32 = 2;
    const MMC_SWITCH_VAL_HS: u32 = 1;
    const MMC_SWITCH_CMD_SET: u32 = 3;

    pub const MMC_SWITCH_4_BIT_BUS: u32 = (MMC_SWITCH_WRITE << 24)
        | (MMC_SWITCH_BUS_WIDTH << 16)
        | (MMC_SWITCH_VAL_4BIT << 8)
        | MMC_SWITCH_CMD_SET;
    pub const MMC_SWITCH_8_BIT_BUS: u32 = (MMC_SWITCH_WRITE << 24)
        | (MMC_SWITCH_BUS_WIDTH << 16)
        | (MMC_SWITCH_VAL_8BIT << 8)
        | MMC_SWITCH_CMD_SET;
    pub const MMC_SWITCH_HS_TIMING: u32 = (MMC_SWITCH_WRITE << 24)
        | (MMC_SWITCH_HIGH_SPEED << 16)
        | (MMC_SWITCH_VAL_HS << 8)
        | MMC_SWITCH_CMD_SET;

    /// Check whether high speed access mode is supported.
    pub const SD_SWITCH_CHECK_HIGH_SPEED: u32 = 0x0000_0001;
    /// Switch to high speed, keep all other function groups.
    pub const SD_SWITCH_SET_HIGH_SPEED: u32 = 0x80FF_FFF1;

    pub const STOP_TRANSMISSION: u32 = 0xFFFF_FFFF;
    pub const GO_IDLE: u32 = 0xFFFF_FFFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmc_switch_arguments() {
        assert_eq!(arg::MMC_SWITCH_4_BIT_BUS, 0x03B7_0103);
        assert_eq!(arg::MMC_SWITCH_8_BIT_BUS, 0x03B7_0203);
        assert_eq!(arg::MMC_SWITCH_HS_TIMING, 0x03B9_0103);
    }

    #[test]
    fn response_properties() {
        assert!(!SD_SEND_OP_COND.response.has_crc());
        assert!(SEND_STATUS.response.has_crc());
        assert!(SEND_CSD.response.is_136_bit());
        assert!(SELECT_CARD.response.has_busy());
        assert!(!GO_IDLE_STATE.response.is_present());
        assert!(READ_MULTIPLE_BLOCK.data.is_multiple());
        assert!(READ_MULTIPLE_BLOCK.data.is_read());
        assert!(WRITE_BLOCK.data.is_write());
    }
}
