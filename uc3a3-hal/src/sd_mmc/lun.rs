//! SD/MMC card as a mass storage logical unit.
//!
//! USB transfers are pipelined: while one sector buffer is moved between the card and RAM by
//! the MCI DMA, the other one is moved between RAM and the USB endpoint.
use super::{SECTOR_SIZE, SdMmcCard, SdMmcError, SdMmcHost, SlotLines};
use crate::ctrl_access::{CtrlError, Lun};
use crate::usb::{self, BulkEndpoints, Direction, EndpointError, POLL_LIMIT};

/// Card presence as reported to the host. Insertion and removal are each reported once as a
/// busy unit so the host rereads the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Initial,
    Removed,
    Inserted,
    Removing,
}

#[repr(C, align(4))]
struct SectorBuffer([u8; SECTOR_SIZE]);

pub struct SdMmcLun<H, L> {
    card: SdMmcCard<H, L>,
    presence: Presence,
    buffers: [SectorBuffer; 2],
}

impl<H: SdMmcHost, L: SlotLines> SdMmcLun<H, L> {
    pub fn new(card: SdMmcCard<H, L>) -> Self {
        Self {
            card,
            presence: Presence::Initial,
            buffers: [SectorBuffer([0; SECTOR_SIZE]), SectorBuffer([0; SECTOR_SIZE])],
        }
    }

    #[inline]
    pub fn card(&mut self) -> &mut SdMmcCard<H, L> {
        &mut self.card
    }

    #[inline]
    pub fn presence(&self) -> Presence {
        self.presence
    }

    fn wait_card_dma(&mut self) -> Result<(), CtrlError> {
        for _ in 0..POLL_LIMIT {
            if self.card.host().is_dma_complete() {
                return Ok(());
            }
        }
        Err(CtrlError::Fail)
    }

    fn wait_usb_dma(usb: &mut dyn BulkEndpoints, dir: Direction) -> Result<(), CtrlError> {
        for _ in 0..POLL_LIMIT {
            if usb.is_dma_complete(dir) {
                return Ok(());
            }
        }
        Err(EndpointError::Timeout.into())
    }

    fn card_to_usb(&mut self, usb: &mut dyn BulkEndpoints, sectors: u32) -> Result<(), CtrlError> {
        let mut id = 0;
        let mut full = false;
        for _ in 0..sectors {
            let dst = self.buffers[id].0.as_mut_ptr();
            // Each buffer is only reused after its previous transfers completed.
            unsafe { self.card.host().start_read_dma(dst, SECTOR_SIZE) }
                .map_err(SdMmcError::from)?;
            id ^= 1;
            if full {
                unsafe { usb.start_in_dma(self.buffers[id].0.as_ptr(), SECTOR_SIZE)? };
                self.wait_card_dma()?;
                Self::wait_usb_dma(usb, Direction::In)?;
            } else {
                full = true;
                self.wait_card_dma()?;
            }
        }
        if full {
            unsafe { usb.start_in_dma(self.buffers[id ^ 1].0.as_ptr(), SECTOR_SIZE)? };
            Self::wait_usb_dma(usb, Direction::In)?;
        }
        usb::wait_drained(usb, Direction::In)?;
        Ok(())
    }

    fn usb_to_card(&mut self, usb: &mut dyn BulkEndpoints, sectors: u32) -> Result<(), CtrlError> {
        let mut id = 0;
        let mut full = false;
        for _ in 0..sectors {
            unsafe { usb.start_out_dma(self.buffers[id].0.as_mut_ptr(), SECTOR_SIZE)? };
            id ^= 1;
            if full {
                let src = self.buffers[id].0.as_ptr();
                unsafe { self.card.host().start_write_dma(src, SECTOR_SIZE) }
                    .map_err(SdMmcError::from)?;
                Self::wait_usb_dma(usb, Direction::Out)?;
                self.wait_card_dma()?;
            } else {
                full = true;
                Self::wait_usb_dma(usb, Direction::Out)?;
            }
        }
        if full {
            let src = self.buffers[id ^ 1].0.as_ptr();
            unsafe { self.card.host().start_write_dma(src, SECTOR_SIZE) }
                .map_err(SdMmcError::from)?;
            self.wait_card_dma()?;
        }
        usb::wait_drained(usb, Direction::Out)?;
        Ok(())
    }
}

impl<H: SdMmcHost, L: SlotLines> Lun for SdMmcLun<H, L> {
    fn test_unit_ready(&mut self) -> Result<(), CtrlError> {
        match self.presence {
            Presence::Initial => {
                self.presence = Presence::Removed;
                Err(CtrlError::Busy)
            }
            Presence::Removed => {
                if self.card.mem_check().is_ok() {
                    self.presence = Presence::Inserted;
                    Err(CtrlError::Busy)
                } else {
                    Err(CtrlError::NotPresent)
                }
            }
            Presence::Inserted => {
                if self.card.mem_check().is_ok() {
                    Ok(())
                } else {
                    self.presence = Presence::Removing;
                    Err(CtrlError::Busy)
                }
            }
            Presence::Removing => {
                self.presence = Presence::Removed;
                Err(CtrlError::NotPresent)
            }
        }
    }

    fn read_capacity(&mut self) -> Result<u32, CtrlError> {
        if self.card.mem_check().is_err() {
            return Err(CtrlError::NotPresent);
        }
        Ok(self.card.capacity().saturating_sub(1))
    }

    fn write_protected(&mut self) -> bool {
        self.card.write_protected()
    }

    fn removable(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "SD/MMC card"
    }

    fn read_to_usb(
        &mut self,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError> {
        if self.card.mem_check().is_err() {
            return Err(CtrlError::NotPresent);
        }
        let count = u16::try_from(sectors).map_err(|_| CtrlError::Fail)?;
        if count == 0 {
            return Ok(());
        }
        self.card.dma_read_open(addr, count)?;
        usb.set_autoswitch(Direction::In, true);
        let result = self.card_to_usb(usb, sectors);
        usb.set_autoswitch(Direction::In, false);
        if let Err(e) = result {
            log::debug!("SD/MMC read of {sectors} sectors at {addr} failed: {e}");
            if let Err(e) = self.card.read_close() {
                log::debug!("SD/MMC read close failed: {e}");
            }
            return Err(CtrlError::Fail);
        }
        self.card.read_close()?;
        Ok(())
    }

    fn write_from_usb(
        &mut self,
        usb: &mut dyn BulkEndpoints,
        addr: u32,
        sectors: u32,
    ) -> Result<(), CtrlError> {
        if self.card.mem_check().is_err() {
            return Err(CtrlError::NotPresent);
        }
        let count = u16::try_from(sectors).map_err(|_| CtrlError::Fail)?;
        if count == 0 {
            return Ok(());
        }
        self.card.dma_write_open(addr, count)?;
        usb.set_autoswitch(Direction::Out, true);
        let result = self.usb_to_card(usb, sectors);
        usb.set_autoswitch(Direction::Out, false);
        if let Err(e) = result {
            log::debug!("SD/MMC write of {sectors} sectors at {addr} failed: {e}");
            if let Err(e) = self.card.write_close() {
                log::debug!("SD/MMC write close failed: {e}");
            }
            return Err(CtrlError::Fail);
        }
        self.card.write_close()?;
        Ok(())
    }

    fn read_to_ram(&mut self, addr: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), CtrlError> {
        if self.card.mem_check().is_err() {
            return Err(CtrlError::NotPresent);
        }
        self.card.read_open(addr, 1)?;
        self.card.read_sector(buf)?;
        self.card.read_close()?;
        Ok(())
    }

    fn write_from_ram(&mut self, addr: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), CtrlError> {
        if self.card.mem_check().is_err() {
            return Err(CtrlError::NotPresent);
        }
        self.card.write_open(addr, 1)?;
        self.card.write_sector(buf)?;
        self.card.write_close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd_mmc::BusWidth;
    use crate::sd_mmc::tests::{MockHost, MockLines, Model, card};
    use crate::usb::tests::{DmaEvent, DmaTrace, MockEndpoints};

    fn traced(lun: &mut SdMmcLun<MockHost, MockLines>, usb: &mut MockEndpoints) -> DmaTrace {
        let trace = DmaTrace::default();
        lun.card().host().trace = Some(trace.clone());
        lun.card().host().dma_pending_polls = 3;
        usb.trace = Some(trace.clone());
        usb.dma_pending_polls = 5;
        trace
    }

    fn lun() -> SdMmcLun<MockHost, MockLines> {
        SdMmcLun::new(card(Model::SdV2Hc, BusWidth::Four))
    }

    #[test]
    fn presence_state_machine() {
        let mut lun = lun();
        assert_eq!(lun.test_unit_ready(), Err(CtrlError::Busy));
        assert_eq!(lun.presence(), Presence::Removed);
        assert_eq!(lun.test_unit_ready(), Err(CtrlError::Busy));
        assert_eq!(lun.presence(), Presence::Inserted);
        assert_eq!(lun.test_unit_ready(), Ok(()));

        lun.card().lines().present = false;
        assert_eq!(lun.test_unit_ready(), Err(CtrlError::Busy));
        assert_eq!(lun.presence(), Presence::Removing);
        assert_eq!(lun.test_unit_ready(), Err(CtrlError::NotPresent));
        assert_eq!(lun.presence(), Presence::Removed);
        assert_eq!(lun.test_unit_ready(), Err(CtrlError::NotPresent));

        lun.card().lines().present = true;
        assert_eq!(lun.test_unit_ready(), Err(CtrlError::Busy));
        assert_eq!(lun.test_unit_ready(), Ok(()));
    }

    #[test]
    fn capacity_and_flags() {
        let mut lun = lun();
        assert_eq!(lun.read_capacity(), Ok((15160 << 10) - 1));
        assert!(lun.removable());
        assert!(!lun.write_protected());
        lun.card().lines().protected = true;
        assert!(lun.write_protected());
        lun.card().lines().present = false;
        assert_eq!(lun.read_capacity(), Err(CtrlError::NotPresent));
    }

    #[test]
    fn pipelined_read_keeps_sector_order() {
        let mut lun = lun();
        lun.card().init().unwrap();
        lun.card().host().next_byte = 0x10;
        let mut usb = MockEndpoints::new(512);
        lun.read_to_usb(&mut usb, 100, 3).unwrap();
        assert_eq!(usb.in_packets.len(), 3);
        for (idx, packet) in usb.in_packets.iter().enumerate() {
            assert_eq!(packet.len(), SECTOR_SIZE);
            assert!(packet.iter().all(|b| *b == 0x10 + idx as u8));
        }
        assert_eq!(lun.card().host().dma_reads.len(), 3);
        assert!(!usb.autoswitch_in);
        let log = &lun.card().host().log;
        assert!(log.contains(&(18, 100)));
        assert_eq!(log.last().map(|(index, _)| *index), Some(12));
    }

    #[test]
    fn single_sector_read() {
        let mut lun = lun();
        lun.card().init().unwrap();
        lun.card().host().next_byte = 0x77;
        let mut usb = MockEndpoints::new(512);
        lun.read_to_usb(&mut usb, 0, 1).unwrap();
        assert_eq!(usb.in_packets.len(), 1);
        assert!(usb.in_packets[0].iter().all(|b| *b == 0x77));
    }

    #[test]
    fn pipelined_write_keeps_sector_order() {
        let mut lun = lun();
        lun.card().init().unwrap();
        let mut usb = MockEndpoints::new(512);
        for value in [0xA0u8, 0xA1, 0xA2] {
            usb.push_out(&[value; SECTOR_SIZE]);
        }
        lun.write_from_usb(&mut usb, 8, 3).unwrap();
        assert_eq!(lun.card().host().dma_writes, [0xA0, 0xA1, 0xA2]);
        assert!(!usb.autoswitch_out);
        assert!(lun.card().host().log.contains(&(25, 8)));
    }

    #[test]
    fn read_overlaps_card_and_usb_dma() {
        use DmaEvent::*;
        let mut lun = lun();
        lun.card().init().unwrap();
        let mut usb = MockEndpoints::new(512);
        let trace = traced(&mut lun, &mut usb);
        lun.read_to_usb(&mut usb, 0, 3).unwrap();
        assert_eq!(
            *trace.borrow(),
            [
                CardStart, CardDone, CardStart, UsbStart, CardDone, UsbDone, CardStart, UsbStart,
                CardDone, UsbDone, UsbStart, UsbDone
            ]
        );
    }

    #[test]
    fn write_overlaps_card_and_usb_dma() {
        use DmaEvent::*;
        let mut lun = lun();
        lun.card().init().unwrap();
        let mut usb = MockEndpoints::new(512);
        for value in [1u8, 2, 3] {
            usb.push_out(&[value; SECTOR_SIZE]);
        }
        let trace = traced(&mut lun, &mut usb);
        lun.write_from_usb(&mut usb, 0, 3).unwrap();
        assert_eq!(
            *trace.borrow(),
            [
                UsbStart, UsbDone, UsbStart, CardStart, UsbDone, CardDone, UsbStart, CardStart,
                UsbDone, CardDone, CardStart, CardDone
            ]
        );
        assert_eq!(lun.card().host().dma_writes, [1, 2, 3]);
    }

    #[test]
    fn failed_card_dma_stops_transmission() {
        let mut lun = lun();
        lun.card().init().unwrap();
        lun.card().host().fail_dma = true;
        let mut usb = MockEndpoints::new(512);
        lun.card().host().log.clear();
        assert_eq!(lun.read_to_usb(&mut usb, 0, 2), Err(CtrlError::Fail));
        assert_eq!(lun.card().host().commands().last(), Some(&12));
        assert!(!usb.autoswitch_in);

        usb.push_out(&[0x55; 2 * SECTOR_SIZE]);
        lun.card().host().log.clear();
        assert_eq!(lun.write_from_usb(&mut usb, 0, 2), Err(CtrlError::Fail));
        assert_eq!(lun.card().host().commands().last(), Some(&12));
        assert!(!usb.autoswitch_out);
    }

    #[test]
    fn stuck_card_dma_fails() {
        let mut lun = lun();
        lun.card().init().unwrap();
        lun.card().host().dma_stuck = true;
        let mut usb = MockEndpoints::new(512);
        assert_eq!(lun.read_to_usb(&mut usb, 0, 1), Err(CtrlError::Fail));
        assert!(usb.in_packets.is_empty());
        assert_eq!(lun.card().host().commands().last(), Some(&12));
    }

    #[test]
    fn stuck_in_endpoint_fails() {
        let mut lun = lun();
        lun.card().init().unwrap();
        let mut usb = MockEndpoints::new(512);
        usb.stuck_in = true;
        assert_eq!(lun.read_to_usb(&mut usb, 0, 2), Err(CtrlError::Fail));
        assert_eq!(usb.dma_log, [(Direction::In, SECTOR_SIZE)]);
        assert_eq!(lun.card().host().commands().last(), Some(&12));
    }

    #[test]
    fn write_beyond_capacity_is_rejected() {
        let mut lun = SdMmcLun::new(card(Model::SdV1, BusWidth::Four));
        lun.card().init().unwrap();
        let mut usb = MockEndpoints::new(512);
        usb.push_out(&[0xEE; SECTOR_SIZE]);
        lun.card().host().log.clear();
        assert_eq!(
            lun.write_from_usb(&mut usb, 0x0080_0000, 1),
            Err(CtrlError::Fail)
        );
        assert!(lun.card().host().log.is_empty());
        assert!(lun.card().host().dma_writes.is_empty());
        assert_eq!(usb.out_packets.len(), 1);
    }

    #[test]
    fn transfer_without_card() {
        let mut lun = lun();
        lun.card().lines().present = false;
        let mut usb = MockEndpoints::new(512);
        assert_eq!(lun.read_to_usb(&mut usb, 0, 1), Err(CtrlError::NotPresent));
        assert_eq!(lun.write_from_usb(&mut usb, 0, 1), Err(CtrlError::NotPresent));
        assert!(usb.in_packets.is_empty());
    }

    #[test]
    fn ram_sector_access() {
        let mut lun = lun();
        lun.card().init().unwrap();
        lun.card().host().next_byte = 0x33;
        let mut buf = [0u8; SECTOR_SIZE];
        lun.read_to_ram(5, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0x33));
        lun.write_from_ram(5, &[0x44; SECTOR_SIZE]).unwrap();
        assert_eq!(lun.card().host().written.len(), SECTOR_SIZE / 4);
    }
}
