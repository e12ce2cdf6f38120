//! # Logical unit access
//!
//! Storage media exported over USB implement [Lun]. [MemoryAccess] collects the logical units
//! and dispatches the SCSI layer's requests by LUN index.
use crate::sd_mmc::{SECTOR_SIZE, SdMmcError};
use crate::usb::{self, BulkEndpoints, EndpointError};

pub const MAX_LUNS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CtrlError {
    #[error("memory access failed")]
    Fail,
    #[error("medium not present")]
    NotPresent,
    #[error("medium busy or changed")]
    Busy,
}

impl From<SdMmcError> for CtrlError {
    fn from(e: SdMmcError) -> Self {
        match e {
            SdMmcError::NotPresent => CtrlError::NotPresent,
            _ => CtrlError::Fail,
        }
    }
}

impl From<EndpointError> for CtrlError {
    fn from(_: EndpointError) -> Self {
        CtrlError::Fail
    }
}

/// A storage medium addressed in 512 byte sectors.
pub trait Lun {
    fn test_unit_ready(&mut self) -> Result<(), CtrlError>;
    /// Address of the last sector.
    fn read_capacity(&mut self) -> Result<u32, CtrlError>;
    /// Sector size in units of 512 bytes.
    fn sector_size(&self) -> u8 {
        1
    }
    fn write_protected(&mut self) -> bool;
    fn removable(&self) -> bool;
    fn name(&self) -> &str;

    /// Send `sectors` sectors starting at `addr` on the IN endpoint.
    fn read_to_usb(
        &mut self,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError>;
    /// Store `sectors` sectors received on the OUT endpoint starting at `addr`.
    fn write_from_usb(
        &mut self,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError>;
    fn read_to_ram(&mut self, addr: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), CtrlError>;
    fn write_from_ram(&mut self, addr: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), CtrlError>;
}

/// Set of logical units, indexed by LUN.
pub struct MemoryAccess<'lun> {
    luns: heapless::Vec<&'lun mut dyn Lun, MAX_LUNS>,
}

impl Default for MemoryAccess<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'lun> MemoryAccess<'lun> {
    pub const fn new() -> Self {
        Self {
            luns: heapless::Vec::new(),
        }
    }

    /// Append a logical unit. Returns the unit back if the set is full.
    pub fn add(&mut self, lun: &'lun mut dyn Lun) -> Result<u8, &'lun mut dyn Lun> {
        self.luns.push(lun)?;
        Ok(self.luns.len() as u8 - 1)
    }

    #[inline]
    pub fn nb_luns(&self) -> u8 {
        self.luns.len() as u8
    }

    #[inline]
    pub fn lun(&mut self, lun: u8) -> Result<&mut dyn Lun, CtrlError> {
        match self.luns.get_mut(lun as usize) {
            Some(unit) => Ok(&mut **unit),
            None => Err(CtrlError::Fail),
        }
    }

    pub fn test_unit_ready(&mut self, lun: u8) -> Result<(), CtrlError> {
        self.lun(lun)?.test_unit_ready()
    }

    pub fn read_capacity(&mut self, lun: u8) -> Result<u32, CtrlError> {
        self.lun(lun)?.read_capacity()
    }

    pub fn sector_size(&mut self, lun: u8) -> u8 {
        self.lun(lun).map(|unit| unit.sector_size()).unwrap_or(1)
    }

    /// Unknown units report write protection.
    pub fn write_protected(&mut self, lun: u8) -> bool {
        self.lun(lun).map(|unit| unit.write_protected()).unwrap_or(true)
    }

    pub fn removable(&mut self, lun: u8) -> bool {
        self.lun(lun).map(|unit| unit.removable()).unwrap_or(true)
    }

    pub fn read_to_usb(
        &mut self,
        lun: u8,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError> {
        self.lun(lun)?.read_to_usb(usb, addr, sectors)
    }

    pub fn write_from_usb(
        &mut self,
        lun: u8,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError> {
        self.lun(lun)?.write_from_usb(usb, addr, sectors)
    }

    pub fn read_to_ram(
        &mut self,
        lun: u8,
        addr: u32,
        buf: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), CtrlError> {
        self.lun(lun)?.read_to_ram(addr, buf)
    }

    pub fn write_from_ram(
        &mut self,
        lun: u8,
        addr: u32,
        buf: &[u8; SECTOR_SIZE],
    ) -> Result<(), CtrlError> {
        self.lun(lun)?.write_from_ram(addr, buf)
    }
}

/// Logical unit backed by a RAM region. Trailing bytes which do not fill a sector are unused.
pub struct RamDisk<'mem> {
    mem: &'mem mut [u8],
    write_protected: bool,
}

impl<'mem> RamDisk<'mem> {
    pub fn new(mem: &'mem mut [u8]) -> Self {
        Self {
            mem,
            write_protected: false,
        }
    }

    pub fn with_write_protection(mut self, protected: bool) -> Self {
        self.write_protected = protected;
        self
    }

    #[inline]
    pub fn sectors(&self) -> u32 {
        (self.mem.len() / SECTOR_SIZE) as u32
    }

    fn range(&self, addr: u32, sectors: u32) -> Result<core::ops::Range<usize>, CtrlError> {
        let end = addr.checked_add(sectors).ok_or(CtrlError::Fail)?;
        if end > self.sectors() {
            return Err(CtrlError::Fail);
        }
        Ok(addr as usize * SECTOR_SIZE..end as usize * SECTOR_SIZE)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.mem
    }
}

impl Lun for RamDisk<'_> {
    fn test_unit_ready(&mut self) -> Result<(), CtrlError> {
        if self.sectors() == 0 {
            return Err(CtrlError::NotPresent);
        }
        Ok(())
    }

    fn read_capacity(&mut self) -> Result<u32, CtrlError> {
        self.sectors().checked_sub(1).ok_or(CtrlError::NotPresent)
    }

    fn write_protected(&mut self) -> bool {
        self.write_protected
    }

    fn removable(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "RAM disk"
    }

    fn read_to_usb(
        &mut self,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError> {
        let range = self.range(addr, sectors)?;
        for sector in self.mem[range].chunks(SECTOR_SIZE) {
            usb::write_in_data(usb, sector)?;
        }
        usb::wait_drained(usb, usb::Direction::In)?;
        Ok(())
    }

    fn write_from_usb(
        &mut self,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError> {
        if self.write_protected {
            return Err(CtrlError::Fail);
        }
        let range = self.range(addr, sectors)?;
        for sector in self.mem[range].chunks_mut(SECTOR_SIZE) {
            if usb::read_out_data(usb, sector)? != SECTOR_SIZE {
                return Err(CtrlError::Fail);
            }
        }
        Ok(())
    }

    fn read_to_ram(&mut self, addr: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), CtrlError> {
        let range = self.range(addr, 1)?;
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn write_from_ram(&mut self, addr: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), CtrlError> {
        if self.write_protected {
            return Err(CtrlError::Fail);
        }
        let range = self.range(addr, 1)?;
        self.mem[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::usb::tests::MockEndpoints;
    use std::vec;

    #[test]
    fn dispatch_by_lun() {
        let mut mem = vec![0u8; 4 * SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem);
        let mut access = MemoryAccess::new();
        assert_eq!(access.add(&mut disk).ok(), Some(0));
        assert_eq!(access.nb_luns(), 1);
        assert_eq!(access.read_capacity(0), Ok(3));
        assert_eq!(access.test_unit_ready(0), Ok(()));
        assert_eq!(access.read_capacity(1), Err(CtrlError::Fail));
        assert!(access.write_protected(1));
        assert!(!access.write_protected(0));
    }

    #[test]
    fn ram_transfers() {
        let mut mem = vec![0u8; 4 * SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem);
        let sector = [0x42u8; SECTOR_SIZE];
        disk.write_from_ram(2, &sector).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_to_ram(2, &mut buf).unwrap();
        assert_eq!(buf, sector);
        assert_eq!(disk.read_to_ram(4, &mut buf), Err(CtrlError::Fail));

        let mut usb = MockEndpoints::new(64);
        disk.read_to_usb(&mut usb, 2, 2).unwrap();
        let sent = usb.in_data();
        assert_eq!(sent.len(), 2 * SECTOR_SIZE);
        assert!(sent[..SECTOR_SIZE].iter().all(|b| *b == 0x42));
        assert!(sent[SECTOR_SIZE..].iter().all(|b| *b == 0));
        assert_eq!(disk.read_to_usb(&mut usb, 3, 2), Err(CtrlError::Fail));

        usb.push_out(&[0x17; SECTOR_SIZE]);
        disk.write_from_usb(&mut usb, 0, 1).unwrap();
        assert!(disk.data()[..SECTOR_SIZE].iter().all(|b| *b == 0x17));
    }

    #[test]
    fn write_protected_disk() {
        let mut mem = vec![0u8; SECTOR_SIZE];
        let mut disk = RamDisk::new(&mut mem).with_write_protection(true);
        assert!(disk.write_protected());
        assert_eq!(
            disk.write_from_ram(0, &[1; SECTOR_SIZE]),
            Err(CtrlError::Fail)
        );
    }

    #[test]
    fn error_conversion() {
        assert_eq!(CtrlError::from(SdMmcError::NotPresent), CtrlError::NotPresent);
        assert_eq!(CtrlError::from(SdMmcError::Crc), CtrlError::Fail);
        assert_eq!(CtrlError::from(EndpointError::Timeout), CtrlError::Fail);
    }
}
