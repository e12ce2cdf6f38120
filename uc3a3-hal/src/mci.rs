//! # Multimedia card interface (MCI) module
//!
//! Host controller for SD and MMC cards. Data is moved either word by word through the data
//! registers or with a DMACA channel through the FIFO aperture.
use arbitrary_int::{Number, u2, u3, u4, u6};
use uc3a3::dmaca::{HANDSHAKE_MCI_RX, HANDSHAKE_MCI_TX};
use uc3a3::mci::{
    ChunkSize, Config, Control, DmaConfig, FIFO_ADDR, Mode, MmioMci, ResponseType, SdCard,
    SpecialCommand, Status, Timeout, TimeoutMultiplier, TransferCommand, TransferType,
};

use crate::clocks::Clocks;
use crate::dmaca::{DmaChannel, DmaError};
use crate::sd_mmc::cmd::{Command, DataTransfer, Response};
use crate::sd_mmc::{BusWidth, DmaDirection, INIT_SPEED, SdMmcHost};
use crate::time::Hertz;

/// Upper bound for status polling loops.
const POLL_LIMIT: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MciError {
    #[error("response timeout")]
    ResponseTimeout,
    #[error("response CRC error")]
    ResponseCrc,
    #[error("response end bit, direction or index error")]
    ResponseError,
    #[error("completion signal timeout")]
    CompletionTimeout,
    #[error("command not completed")]
    CommandTimeout,
    #[error("data timeout")]
    DataTimeout,
    #[error("data CRC error")]
    DataCrc,
    #[error("FIFO overrun")]
    Overrun,
    #[error("FIFO underrun")]
    Underrun,
    #[error("card busy timeout")]
    BusyTimeout,
    #[error("DMA error: {0}")]
    Dma(#[from] DmaError),
}

impl MciError {
    /// Error of a command phase. The response CRC is only checked if `check_crc` is set.
    pub fn from_response_status(status: Status, check_crc: bool) -> Option<Self> {
        if status.rtoe() {
            Some(MciError::ResponseTimeout)
        } else if status.cstoe() {
            Some(MciError::CompletionTimeout)
        } else if status.rende() || status.rdire() || status.rinde() {
            Some(MciError::ResponseError)
        } else if check_crc && status.rcrce() {
            Some(MciError::ResponseCrc)
        } else {
            None
        }
    }

    pub fn from_data_status(status: Status) -> Option<Self> {
        if status.dtoe() {
            Some(MciError::DataTimeout)
        } else if status.dcrce() {
            Some(MciError::DataCrc)
        } else if status.ovre() {
            Some(MciError::Overrun)
        } else if status.unre() {
            Some(MciError::Underrun)
        } else {
            None
        }
    }
}

/// Clock divider for a card clock of `speed`. The card clock is `pbb / (2 * (clkdiv + 1))`
/// and never exceeds the requested speed unless the divider saturates.
pub fn clock_divider(pbb: Hertz, speed: Hertz) -> u8 {
    if speed.raw() == 0 {
        return 0;
    }
    let div = (pbb.raw() as u64).div_ceil(2 * speed.raw() as u64);
    div.saturating_sub(1).min(u8::MAX as u64) as u8
}

/// Command register value for a command.
pub fn command_register(cmd: &Command) -> uc3a3::mci::Command {
    let rsptyp = match cmd.response {
        Response::None => ResponseType::None,
        Response::R2 => ResponseType::Bits136,
        Response::R1b => ResponseType::Bits48WithBusy,
        _ => ResponseType::Bits48,
    };
    let mut reg = uc3a3::mci::Command::DEFAULT
        .with_cmdnb(u6::new(cmd.index & 0x3F))
        .with_rsptyp(rsptyp)
        .with_maxlat(cmd.response.is_present())
        .with_opdcmd(cmd.open_drain);
    if cmd.init_sequence {
        reg = reg.with_spcmd(SpecialCommand::Init);
    }
    match cmd.data {
        DataTransfer::None => (),
        DataTransfer::Stop => reg = reg.with_trcmd(TransferCommand::Stop),
        data => {
            let trtyp = if data.is_multiple() {
                TransferType::MultiBlock
            } else {
                TransferType::SingleBlock
            };
            reg = reg
                .with_trcmd(TransferCommand::Start)
                .with_trdir(data.is_read())
                .with_trtyp(trtyp);
        }
    }
    reg
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MciConfig {
    power_save_divider: u3,
    init_speed: Hertz,
}

impl MciConfig {
    pub const fn new() -> Self {
        Self {
            power_save_divider: u3::MAX,
            init_speed: INIT_SPEED,
        }
    }

    pub const fn with_power_save_divider(mut self, divider: u3) -> Self {
        self.power_save_divider = divider;
        self
    }

    /// Card clock used during identification.
    pub const fn with_init_speed(mut self, speed: Hertz) -> Self {
        self.init_speed = speed;
        self
    }

    #[inline]
    pub const fn init_speed(&self) -> Hertz {
        self.init_speed
    }
}

impl Default for MciConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Mci {
    regs: MmioMci<'static>,
    dma: DmaChannel,
    clocks: Clocks,
    config: MciConfig,
}

impl Mci {
    /// Create the driver and put the controller into identification mode.
    pub fn new(
        regs: MmioMci<'static>,
        dma: DmaChannel,
        clocks: &Clocks,
        config: MciConfig,
    ) -> Self {
        let mut mci = Self {
            regs,
            dma,
            clocks: *clocks,
            config,
        };
        mci.init();
        mci
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioMci<'static> {
        &mut self.regs
    }

    #[inline]
    pub fn config(&self) -> &MciConfig {
        &self.config
    }

    /// Software reset which keeps the mode, timeout, bus and FIFO configuration.
    pub fn reset(&mut self) {
        let mr = self.regs.read_mr();
        let dtor = self.regs.read_dtor();
        let sdcr = self.regs.read_sdcr();
        let cstor = self.regs.read_cstor();
        let cfg = self.regs.read_cfg();

        self.regs.write_cr(Control::DEFAULT.with_swrst(true));

        self.regs.write_mr(mr);
        self.regs.write_dtor(dtor);
        self.regs.write_sdcr(sdcr);
        self.regs.write_cstor(cstor);
        self.regs.write_cfg(cfg);
        self.regs.write_dma(DmaConfig::DEFAULT);
        self.regs
            .write_cr(Control::DEFAULT.with_mci_en(true).with_pws_en(true));
    }

    #[inline]
    fn status(&mut self) -> Status {
        self.regs.read_sr()
    }

    fn set_data_proof(&mut self, read: bool, write: bool) {
        self.regs.modify_mr(|mut mr| {
            mr.set_rdproof(read);
            mr.set_wrproof(write);
            mr
        });
    }
}

impl SdMmcHost for Mci {
    fn init(&mut self) {
        self.regs.write_cr(Control::DEFAULT.with_swrst(true));
        self.regs
            .write_idr(Status::new_with_raw_value(u32::MAX));
        let timeout = Timeout::DEFAULT
            .with_multiplier(TimeoutMultiplier::M1048576)
            .with_cycles(u4::new(2));
        self.regs.write_dtor(timeout);
        self.regs.write_cstor(timeout);
        self.regs.write_cfg(
            Config::DEFAULT
                .with_fifo_mode(true)
                .with_ferrctrl(true),
        );
        self.regs.write_mr(
            Mode::DEFAULT
                .with_pwsdiv(self.config.power_save_divider)
                .with_clkdiv(u8::MAX),
        );
        self.regs.write_sdcr(
            SdCard::DEFAULT
                .with_bus_width(uc3a3::mci::BusWidth::OneBit)
                .with_slot(u2::new(0)),
        );
        self.regs.write_dma(DmaConfig::DEFAULT);
        self.regs
            .write_cr(Control::DEFAULT.with_mci_en(true).with_pws_en(true));
        self.set_speed(self.config.init_speed);
    }

    fn select_slot(&mut self, slot: u8, bus_width: BusWidth) {
        self.regs.write_sdcr(
            SdCard::DEFAULT
                .with_bus_width(bus_width.into())
                .with_slot(u2::new(slot & 0b11)),
        );
    }

    fn set_bus_width(&mut self, bus_width: BusWidth) {
        self.regs.modify_sdcr(|mut sdcr| {
            sdcr.set_bus_width(bus_width.into());
            sdcr
        });
    }

    fn set_speed(&mut self, speed: Hertz) {
        let clkdiv = clock_divider(self.clocks.pbb(), speed);
        self.regs.modify_mr(|mut mr| {
            mr.set_clkdiv(clkdiv);
            mr
        });
    }

    fn set_high_speed(&mut self, enable: bool) {
        self.regs.modify_cfg(|mut cfg| {
            cfg.set_hs_mode(enable);
            cfg
        });
    }

    fn send_command(&mut self, cmd: Command, arg: u32) -> Result<(), MciError> {
        match cmd.data {
            DataTransfer::None | DataTransfer::Stop => (),
            data => self.set_data_proof(data.is_read(), data.is_write()),
        }
        self.regs.write_argr(arg);
        self.regs.write_cmdr(command_register(&cmd));

        let mut polls = 0;
        loop {
            let status = self.status();
            if let Some(e) = MciError::from_response_status(status, cmd.response.has_crc()) {
                log::debug!("MCI CMD{} failed: {e}", cmd.index);
                self.reset();
                return Err(e);
            }
            if status.cmdrdy() {
                break;
            }
            polls += 1;
            if polls >= POLL_LIMIT {
                self.reset();
                return Err(MciError::CommandTimeout);
            }
        }
        if cmd.response.has_busy() {
            self.wait_not_busy()?;
        }
        Ok(())
    }

    fn response(&mut self) -> u32 {
        self.regs.read_rspr(0).unwrap_or_default()
    }

    fn response_136(&mut self) -> [u32; 4] {
        let mut words = [0; 4];
        for (idx, word) in words.iter_mut().enumerate() {
            *word = self.regs.read_rspr(idx).unwrap_or_default();
        }
        words
    }

    fn set_block_size(&mut self, size: u16) {
        self.regs.modify_blkr(|mut blkr| {
            blkr.set_blklen(size);
            blkr
        });
    }

    fn set_block_count(&mut self, count: u16) {
        self.regs.modify_blkr(|mut blkr| {
            blkr.set_bcnt(count);
            blkr
        });
    }

    fn read_word(&mut self) -> Result<u32, MciError> {
        for _ in 0..POLL_LIMIT {
            let status = self.status();
            if let Some(e) = MciError::from_data_status(status) {
                return Err(e);
            }
            if status.rxrdy() {
                return Ok(self.regs.read_rdr());
            }
        }
        Err(MciError::DataTimeout)
    }

    fn write_word(&mut self, word: u32) -> Result<(), MciError> {
        for _ in 0..POLL_LIMIT {
            let status = self.status();
            if let Some(e) = MciError::from_data_status(status) {
                return Err(e);
            }
            if status.txrdy() {
                self.regs.write_tdr(word);
                return Ok(());
            }
        }
        Err(MciError::DataTimeout)
    }

    fn wait_not_busy(&mut self) -> Result<(), MciError> {
        for _ in 0..POLL_LIMIT {
            let status = self.status();
            if status.not_busy() && !status.dtip() {
                return Ok(());
            }
        }
        self.reset();
        Err(MciError::BusyTimeout)
    }

    fn crc_error(&mut self) -> bool {
        self.status().dcrce()
    }

    fn data_block_ended(&mut self) -> bool {
        self.status().blke()
    }

    fn prepare_dma(&mut self, _direction: DmaDirection) {
        self.regs.write_dma(
            DmaConfig::DEFAULT
                .with_dma_en(true)
                .with_chksize(ChunkSize::Bytes16),
        );
    }

    unsafe fn start_read_dma(&mut self, ram: *mut u8, len: usize) -> Result<(), MciError> {
        unsafe { self.dma.start_p2m(HANDSHAKE_MCI_RX, FIFO_ADDR, ram, len)? };
        Ok(())
    }

    unsafe fn start_write_dma(&mut self, ram: *const u8, len: usize) -> Result<(), MciError> {
        unsafe { self.dma.start_m2p(HANDSHAKE_MCI_TX, ram, FIFO_ADDR, len)? };
        Ok(())
    }

    fn is_dma_complete(&mut self) -> bool {
        self.dma.is_complete()
    }

    fn delay_us(&mut self, us: u32) {
        crate::clocks::delay_us(self.clocks.cpu(), us);
    }
}

impl From<BusWidth> for uc3a3::mci::BusWidth {
    fn from(width: BusWidth) -> Self {
        match width {
            BusWidth::One => uc3a3::mci::BusWidth::OneBit,
            BusWidth::Four => uc3a3::mci::BusWidth::FourBit,
            BusWidth::Eight => uc3a3::mci::BusWidth::EightBit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd_mmc::cmd;
    use fugit::RateExtU32;

    #[test]
    fn divider_never_exceeds_requested_speed() {
        // 66 MHz / 800 kHz = 82.5
        assert_eq!(clock_divider(66.MHz(), 400.kHz()), 82);
        assert_eq!(clock_divider(66.MHz(), 33.MHz()), 0);
        assert_eq!(clock_divider(66.MHz(), 50.MHz()), 0);
        assert_eq!(clock_divider(66.MHz(), 25.MHz()), 1);
        assert_eq!(clock_divider(66.MHz(), 0.Hz()), 0);
        assert_eq!(clock_divider(66.MHz(), 100.Hz()), u8::MAX);
    }

    #[test]
    fn command_encoding() {
        assert_eq!(command_register(&cmd::SEND_STATUS).raw_value(), 0x0000_104D);
        assert_eq!(
            command_register(&cmd::READ_MULTIPLE_BLOCK).raw_value(),
            0x000D_1052
        );
        assert_eq!(command_register(&cmd::ALL_SEND_CID).raw_value(), 0x0000_1882);
        assert_eq!(command_register(&cmd::INIT_SEQUENCE).raw_value(), 0x0000_0900);
        assert_eq!(
            command_register(&cmd::STOP_WRITE_TRANSMISSION).raw_value(),
            0x0002_10CC
        );
        assert_eq!(command_register(&cmd::WRITE_BLOCK).raw_value(), 0x0001_1058);
    }

    #[test]
    fn response_errors() {
        let crc = Status::DEFAULT.with_rcrce(true);
        assert_eq!(
            MciError::from_response_status(crc, true),
            Some(MciError::ResponseCrc)
        );
        assert_eq!(MciError::from_response_status(crc, false), None);
        assert_eq!(
            MciError::from_response_status(Status::DEFAULT.with_rtoe(true).with_rcrce(true), true),
            Some(MciError::ResponseTimeout)
        );
        assert_eq!(
            MciError::from_response_status(Status::DEFAULT.with_rinde(true), false),
            Some(MciError::ResponseError)
        );
        assert_eq!(
            MciError::from_data_status(Status::DEFAULT.with_cmdrdy(true).with_ovre(true)),
            Some(MciError::Overrun)
        );
        assert_eq!(MciError::from_data_status(Status::DEFAULT.with_rxrdy(true)), None);
    }
}
