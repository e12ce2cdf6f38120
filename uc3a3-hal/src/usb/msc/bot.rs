//! Bulk-Only Transport framing.
use crate::usb::Direction;

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CSW_SIGNATURE: u32 = 0x5342_5355;
pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;
pub const MAX_CDB_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CbwError {
    #[error("invalid CBW length {0}")]
    InvalidLength(usize),
    #[error("invalid CBW signature {0:#010x}")]
    InvalidSignature(u32),
    #[error("invalid command block length {0}")]
    InvalidCommandLength(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlockWrapper {
    pub tag: u32,
    pub data_transfer_length: u32,
    /// Data stage direction. Only meaningful if a data stage exists.
    pub direction: Direction,
    pub lun: u8,
    pub cb_length: u8,
    pub cdb: [u8; MAX_CDB_LEN],
}

impl CommandBlockWrapper {
    pub fn parse(raw: &[u8]) -> Result<Self, CbwError> {
        if raw.len() != CBW_LEN {
            return Err(CbwError::InvalidLength(raw.len()));
        }
        let signature = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if signature != CBW_SIGNATURE {
            return Err(CbwError::InvalidSignature(signature));
        }
        let cb_length = raw[14] & 0x1F;
        if cb_length == 0 || cb_length as usize > MAX_CDB_LEN {
            return Err(CbwError::InvalidCommandLength(cb_length));
        }
        let mut cdb = [0; MAX_CDB_LEN];
        cdb.copy_from_slice(&raw[15..CBW_LEN]);
        Ok(Self {
            tag: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            data_transfer_length: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            direction: if raw[12] & 0x80 != 0 {
                Direction::In
            } else {
                Direction::Out
            },
            lun: raw[13] & 0x0F,
            cb_length,
            cdb,
        })
    }

    #[inline]
    pub fn opcode(&self) -> u8 {
        self.cdb[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CommandStatus {
    #[default]
    Passed = 0,
    Failed = 1,
    PhaseError = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatusWrapper {
    pub tag: u32,
    pub residue: u32,
    pub status: CommandStatus,
}

impl CommandStatusWrapper {
    pub fn to_bytes(&self) -> [u8; CSW_LEN] {
        let mut raw = [0; CSW_LEN];
        raw[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        raw[4..8].copy_from_slice(&self.tag.to_le_bytes());
        raw[8..12].copy_from_slice(&self.residue.to_le_bytes());
        raw[12] = self.status as u8;
        raw
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn cbw(tag: u32, length: u32, direction: Direction, lun: u8, cdb: &[u8]) -> [u8; CBW_LEN] {
        let mut raw = [0; CBW_LEN];
        raw[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        raw[4..8].copy_from_slice(&tag.to_le_bytes());
        raw[8..12].copy_from_slice(&length.to_le_bytes());
        raw[12] = if direction == Direction::In { 0x80 } else { 0 };
        raw[13] = lun;
        raw[14] = cdb.len() as u8;
        raw[15..15 + cdb.len()].copy_from_slice(cdb);
        raw
    }

    #[test]
    fn parse_read10() {
        let raw = cbw(0x1234_5678, 1024, Direction::In, 1, &[0x28, 0, 0, 0, 0, 8, 0, 0, 2, 0]);
        let cbw = CommandBlockWrapper::parse(&raw).unwrap();
        assert_eq!(cbw.tag, 0x1234_5678);
        assert_eq!(cbw.data_transfer_length, 1024);
        assert_eq!(cbw.direction, Direction::In);
        assert_eq!(cbw.lun, 1);
        assert_eq!(cbw.cb_length, 10);
        assert_eq!(cbw.opcode(), 0x28);
        assert_eq!(cbw.cdb[5], 8);
    }

    #[test]
    fn rejects_invalid_wrappers() {
        let raw = cbw(1, 0, Direction::Out, 0, &[0x00; 6]);
        assert_eq!(
            CommandBlockWrapper::parse(&raw[..30]),
            Err(CbwError::InvalidLength(30))
        );
        let mut long = [0u8; 32];
        long[..CBW_LEN].copy_from_slice(&raw);
        assert_eq!(
            CommandBlockWrapper::parse(&long),
            Err(CbwError::InvalidLength(32))
        );
        let mut bad = raw;
        bad[0] = 0x56;
        assert!(matches!(
            CommandBlockWrapper::parse(&bad),
            Err(CbwError::InvalidSignature(_))
        ));
        let mut bad = raw;
        bad[14] = 0;
        assert_eq!(
            CommandBlockWrapper::parse(&bad),
            Err(CbwError::InvalidCommandLength(0))
        );
        bad[14] = 17;
        assert_eq!(
            CommandBlockWrapper::parse(&bad),
            Err(CbwError::InvalidCommandLength(17))
        );
    }

    #[test]
    fn csw_layout() {
        let csw = CommandStatusWrapper {
            tag: 0xAABB_CCDD,
            residue: 512,
            status: CommandStatus::Failed,
        };
        assert_eq!(
            csw.to_bytes(),
            [0x55, 0x53, 0x42, 0x53, 0xDD, 0xCC, 0xBB, 0xAA, 0x00, 0x02, 0x00, 0x00, 0x01]
        );
    }
}
