//! # SD/MMC card protocol
//!
//! Card detection, initialization and block access on top of a [SdMmcHost] controller, which is
//! usually the [MCI][crate::mci::Mci].
//!
//! Initialization detects MMC, MMC v4 (optionally high capacity), SD v1, SD v2 and SD high
//! capacity cards, negotiates the widest bus the slot supports and switches to high speed
//! timing where the card supports it.
use arbitrary_int::{u2, u3, u4, u12, u22};

use crate::mci::MciError;
use crate::time::Hertz;

pub mod cmd;
pub mod lun;

use cmd::arg;

pub const SECTOR_SIZE: usize = 512;
/// Size of the SD switch function status block.
const SWITCH_STATUS_SIZE: usize = 64;
/// Upper bound for the CMD1 and ACMD41 busy polling loops.
pub const OP_COND_RETRIES: u32 = 10_000;
/// Number of initialization retries performed by [SdMmcCard::mem_check].
pub const MEM_CHECK_RETRIES: u32 = 10;
/// Upper bound for polling loops on the data lines.
const POLL_LIMIT: u32 = 10_000_000;
/// Identification mode clock.
pub const INIT_SPEED: Hertz = Hertz::from_raw(400_000);

const FREQ_UNIT: [u32; 4] = [10, 100, 1000, 10000];
const FREQ_MULT: [u32; 16] = [0, 10, 12, 13, 15, 20, 26, 30, 35, 40, 45, 52, 55, 60, 70, 80];

/// Detected card type. Set bits accumulate during initialization.
#[bitbybit::bitfield(u8, default = 0x0, debug)]
#[derive(PartialEq, Eq)]
pub struct CardType {
    #[bit(5, rw)]
    mmc_hc: bool,
    #[bit(4, rw)]
    sd_hc: bool,
    #[bit(3, rw)]
    sd_v2: bool,
    #[bit(2, rw)]
    mmc_v4: bool,
    #[bit(1, rw)]
    sd: bool,
    #[bit(0, rw)]
    mmc: bool,
}

impl CardType {
    /// High capacity cards are addressed in sectors instead of bytes.
    #[inline]
    pub const fn is_high_capacity(&self) -> bool {
        self.sd_hc() || self.mmc_hc()
    }

    #[inline]
    pub const fn is_unknown(&self) -> bool {
        self.raw_value() == 0
    }
}

/// Operation conditions register.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Ocr {
    /// Cleared while the card is still powering up.
    #[bit(31, rw)]
    ready: bool,
    #[bit(30, rw)]
    high_capacity: bool,
    #[bit(20, rw)]
    voltage_3_2v_3_3v: bool,
    #[bits(15..=23, rw)]
    voltage_window: arbitrary_int::u9,
}

/// Card status returned with R1 responses.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct CardStatus {
    #[bit(31, rw)]
    out_of_range: bool,
    #[bit(30, rw)]
    address_error: bool,
    #[bit(29, rw)]
    block_len_error: bool,
    #[bit(28, rw)]
    erase_seq_error: bool,
    #[bit(27, rw)]
    erase_param: bool,
    #[bit(26, rw)]
    wp_violation: bool,
    #[bit(25, rw)]
    card_is_locked: bool,
    #[bit(24, rw)]
    lock_unlock_failed: bool,
    #[bit(23, rw)]
    com_crc_error: bool,
    #[bit(22, rw)]
    illegal_command: bool,
    #[bit(21, rw)]
    card_ecc_failed: bool,
    #[bit(20, rw)]
    cc_error: bool,
    #[bit(19, rw)]
    error: bool,
    #[bits(9..=12, rw)]
    current_state: u4,
    #[bit(8, rw)]
    ready_for_data: bool,
    #[bit(5, rw)]
    app_cmd: bool,
}

impl CardStatus {
    /// Errors which abort a read or write command.
    pub const RW_ERRORS: u32 = 0xF050_0000;
    const TRAN_STATE_MASK: u32 = 0xE002_0E00;
    const TRAN_STATE: u32 = 0x0000_0800;

    /// Card is in transfer state without address or sequence errors.
    #[inline]
    pub const fn is_tran_state(&self) -> bool {
        self.raw_value() & Self::TRAN_STATE_MASK == Self::TRAN_STATE
    }

    #[inline]
    pub const fn has_rw_error(&self) -> bool {
        self.raw_value() & Self::RW_ERRORS != 0
    }
}

/// Card specific data register, covering the fields of CSD version 1.0, 2.0 and the MMC
/// layout. Bit 0 is the stop bit of the response.
#[bitbybit::bitfield(u128, default = 0x0, debug)]
pub struct Csd {
    #[bits(126..=127, rw)]
    csd_structure: u2,
    /// MMC only.
    #[bits(122..=125, rw)]
    spec_vers: u4,
    #[bits(96..=103, rw)]
    tran_speed: u8,
    #[bits(84..=95, rw)]
    ccc: u12,
    #[bits(80..=83, rw)]
    read_bl_len: u4,
    /// Device size for CSD version 1.0 and MMC.
    #[bits(62..=73, rw)]
    c_size: u12,
    /// Device size for CSD version 2.0.
    #[bits(48..=69, rw)]
    c_size_v2: u22,
    #[bits(47..=49, rw)]
    c_size_mult: u3,
    #[bits(22..=25, rw)]
    write_bl_len: u4,
    #[bit(13, rw)]
    perm_write_protect: bool,
    #[bit(12, rw)]
    tmp_write_protect: bool,
}

impl Csd {
    /// Build from the four response words, most significant word first.
    pub const fn from_words(words: [u32; 4]) -> Self {
        Self::new_with_raw_value(
            ((words[0] as u128) << 96)
                | ((words[1] as u128) << 64)
                | ((words[2] as u128) << 32)
                | words[3] as u128,
        )
    }

    pub const fn to_words(&self) -> [u32; 4] {
        let raw = self.raw_value();
        [
            (raw >> 96) as u32,
            (raw >> 64) as u32,
            (raw >> 32) as u32,
            raw as u32,
        ]
    }

    /// Maximum transfer rate in kHz. SD cards use 25 and 50 MHz where MMC cards use 26 and
    /// 52 MHz.
    pub fn frequency_khz(&self, sd: bool) -> Result<u32, SdMmcError> {
        let unit = FREQ_UNIT
            .get((self.tran_speed() & 0x07) as usize)
            .ok_or(SdMmcError::InvalidTransferSpeed(self.tran_speed()))?;
        let mut mult = FREQ_MULT[((self.tran_speed() >> 3) & 0x0F) as usize];
        if sd {
            mult = match mult {
                26 => 25,
                52 => 50,
                other => other,
            };
        }
        Ok(mult * unit)
    }

    /// Capacity in 512 byte sectors.
    pub fn capacity_sectors(&self, high_capacity: bool) -> Result<u32, SdMmcError> {
        if high_capacity {
            let sectors = (self.c_size_v2().value() as u64 + 1) << 10;
            return Ok(u32::try_from(sectors).unwrap_or(u32::MAX));
        }
        let write_bl_len = self.write_bl_len().value();
        let read_bl_len = self.read_bl_len().value();
        if write_bl_len < 9 || read_bl_len < 9 {
            return Err(SdMmcError::UnsupportedBlockLength);
        }
        let mult = 1u64 << (self.c_size_mult().value() + 2);
        let block_nr = mult * (self.c_size().value() as u64 + 1);
        Ok((((1u64 << read_bl_len) * block_nr) / SECTOR_SIZE as u64) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

impl BusWidth {
    #[inline]
    pub const fn lines(&self) -> u8 {
        match self {
            BusWidth::One => 1,
            BusWidth::Four => 4,
            BusWidth::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Card to RAM.
    Read,
    /// RAM to card.
    Write,
}

/// Lock/unlock command byte of CMD42.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockCommand {
    Unlock = 0x00,
    Lock = 0x01,
    ClearPassword = 0x02,
    FullErase = 0x08,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SdMmcError {
    #[error("no card present")]
    NotPresent,
    #[error("card did not leave the busy state")]
    Timeout,
    #[error("host error: {0}")]
    Host(#[from] MciError),
    #[error("block length smaller than 512 bytes not supported")]
    UnsupportedBlockLength,
    #[error("invalid transfer speed field {0:#x}")]
    InvalidTransferSpeed(u8),
    #[error("card not in transfer state, status {0:#010x}")]
    NotTransferState(u32),
    #[error("card reported read/write error, status {0:#010x}")]
    ReadWrite(u32),
    #[error("data CRC error")]
    Crc,
    #[error("buffer length does not match sector count")]
    InvalidBuffer,
    #[error("password too long")]
    PasswordTooLong,
    #[error("{count} sectors at {sector} exceed the card capacity")]
    OutOfRange { sector: u32, count: u16 },
}

/// Controller side of the card protocol.
pub trait SdMmcHost {
    /// Reset the controller to identification mode: 1-bit bus, lowest clock, no high speed.
    fn init(&mut self);
    fn select_slot(&mut self, slot: u8, bus_width: BusWidth);
    fn set_bus_width(&mut self, bus_width: BusWidth);
    fn set_speed(&mut self, speed: Hertz);
    fn set_high_speed(&mut self, enable: bool);
    fn send_command(&mut self, cmd: cmd::Command, arg: u32) -> Result<(), MciError>;
    /// Response of a 48-bit response command.
    fn response(&mut self) -> u32;
    /// Response of a 136-bit response command, most significant word first.
    fn response_136(&mut self) -> [u32; 4];
    fn set_block_size(&mut self, size: u16);
    fn set_block_count(&mut self, count: u16);
    fn read_word(&mut self) -> Result<u32, MciError>;
    fn write_word(&mut self, word: u32) -> Result<(), MciError>;
    fn wait_not_busy(&mut self) -> Result<(), MciError>;
    fn crc_error(&mut self) -> bool;
    fn data_block_ended(&mut self) -> bool;
    /// Arm the controller for DMA transfers of the next data command.
    fn prepare_dma(&mut self, direction: DmaDirection);
    /// Start moving `len` bytes from the card into RAM.
    ///
    /// # Safety
    ///
    /// `ram` must stay valid for `len` bytes until [Self::is_dma_complete] returns true.
    unsafe fn start_read_dma(&mut self, ram: *mut u8, len: usize) -> Result<(), MciError>;
    /// Start moving `len` bytes from RAM to the card.
    ///
    /// # Safety
    ///
    /// `ram` must stay valid for `len` bytes until [Self::is_dma_complete] returns true.
    unsafe fn start_write_dma(&mut self, ram: *const u8, len: usize) -> Result<(), MciError>;
    fn is_dma_complete(&mut self) -> bool;
    fn delay_us(&mut self, us: u32);
}

/// Card detect, write protect and DAT0 sensing of a card slot.
pub trait SlotLines {
    fn card_present(&mut self) -> bool;
    fn write_protected(&mut self) -> bool;
    /// DAT0 is released by the card once it finished programming.
    fn dat0_high(&mut self) -> bool;
}

/// Slot lines wired to GPIO inputs.
pub struct GpioSlotLines {
    detect: crate::gpio::Input,
    detect_active_high: bool,
    protect: Option<crate::gpio::Input>,
    dat0: crate::gpio::Input,
}

impl GpioSlotLines {
    pub fn new(
        detect: crate::gpio::Input,
        detect_active_high: bool,
        protect: Option<crate::gpio::Input>,
        dat0: crate::gpio::Input,
    ) -> Self {
        Self {
            detect,
            detect_active_high,
            protect,
            dat0,
        }
    }
}

impl SlotLines for GpioSlotLines {
    fn card_present(&mut self) -> bool {
        self.detect.is_high() == self.detect_active_high
    }

    fn write_protected(&mut self) -> bool {
        self.protect.as_ref().is_some_and(|pin| pin.is_high())
    }

    fn dat0_high(&mut self) -> bool {
        self.dat0.is_high()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    slot: u8,
    bus_width: BusWidth,
}

impl SlotConfig {
    pub const fn new(slot: u8, bus_width: BusWidth) -> Self {
        Self { slot, bus_width }
    }

    #[inline]
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// Number of data lines wired to the slot.
    #[inline]
    pub const fn bus_width(&self) -> BusWidth {
        self.bus_width
    }
}

/// A card in a single slot.
pub struct SdMmcCard<H, L> {
    host: H,
    lines: L,
    config: SlotConfig,
    card_type: CardType,
    rca: u32,
    capacity: u32,
    freq_khz: u32,
    bus_width: BusWidth,
    init_done: bool,
}

impl<H: SdMmcHost, L: SlotLines> SdMmcCard<H, L> {
    pub fn new(host: H, lines: L, config: SlotConfig) -> Self {
        Self {
            host,
            lines,
            config,
            card_type: CardType::DEFAULT,
            rca: 0,
            capacity: 0,
            freq_khz: 0,
            bus_width: BusWidth::One,
            init_done: false,
        }
    }

    #[inline]
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Capacity in 512 byte sectors.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn frequency_khz(&self) -> u32 {
        self.freq_khz
    }

    #[inline]
    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    #[inline]
    pub fn rca(&self) -> u32 {
        self.rca
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.init_done
    }

    #[inline]
    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    #[inline]
    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    #[inline]
    pub fn lines(&mut self) -> &mut L {
        &mut self.lines
    }

    pub fn card_present(&mut self) -> bool {
        self.lines.card_present()
    }

    pub fn write_protected(&mut self) -> bool {
        self.lines.write_protected()
    }

    fn select(&mut self) {
        self.host.select_slot(self.config.slot, self.bus_width);
    }

    /// Card address of an access to `count` sectors. Standard capacity cards are byte
    /// addressed.
    fn card_address(&self, sector: u32, count: u16) -> Result<u32, SdMmcError> {
        let out_of_range = SdMmcError::OutOfRange { sector, count };
        let end = sector.checked_add(count as u32).ok_or(out_of_range)?;
        if end > self.capacity {
            return Err(out_of_range);
        }
        if self.card_type.is_high_capacity() {
            Ok(sector)
        } else {
            sector.checked_mul(SECTOR_SIZE as u32).ok_or(out_of_range)
        }
    }

    /// Run the identification and speed negotiation sequence. Returns immediately if the card
    /// was already initialized.
    pub fn init(&mut self) -> Result<(), SdMmcError> {
        if self.init_done {
            return Ok(());
        }
        self.card_type = CardType::DEFAULT;
        self.bus_width = BusWidth::One;
        self.host.init();
        self.select();

        self.host.send_command(cmd::INIT_SEQUENCE, arg::GO_IDLE)?;
        self.host.send_command(cmd::GO_IDLE_STATE, arg::GO_IDLE)?;

        if !self.detect_mmc()? {
            self.detect_sd()?;
        }

        self.host.send_command(cmd::ALL_SEND_CID, 0)?;
        if self.card_type.mmc() {
            self.rca = arg::RCA_DEFAULT;
            self.host
                .send_command(cmd::SET_RELATIVE_ADDR, arg::RCA_DEFAULT)?;
        } else {
            self.host
                .send_command(cmd::SET_RELATIVE_ADDR, arg::RCA_RESERVE)?;
            self.rca = self.host.response() & arg::RCA_MASK;
        }

        self.read_csd()?;

        self.host.send_command(cmd::SELECT_CARD, self.rca)?;
        self.host.wait_not_busy()?;

        if self.card_type.mmc_v4() {
            self.read_ext_csd()?;
        }

        self.negotiate_bus_width()?;

        if self.card_type.mmc_v4() {
            self.host
                .send_command(cmd::MMC_SWITCH, arg::MMC_SWITCH_HS_TIMING)?;
            self.host.wait_not_busy()?;
        }

        if self.card_type.sd_v2() {
            self.sd_switch_high_speed()?;
        }

        self.host.set_speed(Hertz::from_raw(self.freq_khz * 1000));

        let status = self.send_status()?;
        if !status.is_tran_state() {
            return Err(SdMmcError::NotTransferState(status.raw_value()));
        }
        self.set_block_len(SECTOR_SIZE as u16)?;

        log::debug!(
            "card init done: type {:#04x}, {} sectors, {} kHz, {}-bit bus",
            self.card_type.raw_value(),
            self.capacity,
            self.freq_khz,
            self.bus_width.lines()
        );
        self.init_done = true;
        Ok(())
    }

    /// CMD1 is only answered by MMC cards. Returns false for SD cards.
    fn detect_mmc(&mut self) -> Result<bool, SdMmcError> {
        for _ in 0..OP_COND_RETRIES {
            if self
                .host
                .send_command(
                    cmd::MMC_SEND_OP_COND,
                    arg::OCR_BUSY | arg::OCR_VOLTAGE_ALL | arg::OCR_HC,
                )
                .is_err()
            {
                return Ok(false);
            }
            self.card_type = CardType::DEFAULT.with_mmc(true);
            let ocr = Ocr::new_with_raw_value(self.host.response());
            if ocr.ready() {
                if ocr.high_capacity() {
                    self.card_type.set_mmc_hc(true);
                }
                return Ok(true);
            }
        }
        Err(SdMmcError::Timeout)
    }

    fn detect_sd(&mut self) -> Result<(), SdMmcError> {
        self.card_type = CardType::DEFAULT.with_sd(true);
        if self
            .host
            .send_command(cmd::SD_SEND_IF_COND, arg::IF_COND_CHECK)
            .is_ok()
            && self.host.response() == arg::IF_COND_CHECK
        {
            self.card_type.set_sd_v2(true);
        }
        let mut op_cond = arg::OCR_BUSY | arg::OCR_VOLTAGE_3_2V_3_3V;
        if self.card_type.sd_v2() {
            op_cond |= arg::OCR_HC;
        }
        for _ in 0..OP_COND_RETRIES {
            self.host.send_command(cmd::APP_CMD, 0)?;
            self.host.send_command(cmd::SD_SEND_OP_COND, op_cond)?;
            let ocr = Ocr::new_with_raw_value(self.host.response());
            if ocr.ready() {
                if ocr.high_capacity() {
                    self.card_type.set_sd_hc(true);
                }
                return Ok(());
            }
        }
        Err(SdMmcError::Timeout)
    }

    fn read_csd(&mut self) -> Result<(), SdMmcError> {
        self.select();
        self.host.send_command(cmd::SEND_CSD, self.rca)?;
        let csd = Csd::from_words(self.host.response_136());
        if self.card_type.mmc() && csd.spec_vers().value() == 4 {
            self.card_type.set_mmc_v4(true);
        }
        self.freq_khz = csd.frequency_khz(self.card_type.sd())?;
        // MMC high capacity sizes are taken from the EXT_CSD.
        if !self.card_type.mmc_hc() {
            self.capacity = csd.capacity_sectors(self.card_type.sd_hc())?;
        }
        Ok(())
    }

    fn read_ext_csd(&mut self) -> Result<(), SdMmcError> {
        self.select();
        self.host.set_block_size(SECTOR_SIZE as u16);
        self.host.set_block_count(1);
        self.host.send_command(cmd::MMC_SEND_EXT_CSD, 0)?;
        let mut ext_csd = [0u8; SECTOR_SIZE];
        self.read_data(&mut ext_csd)?;
        self.freq_khz = if ext_csd[196] & 0x02 != 0 {
            52_000
        } else {
            26_000
        };
        if self.card_type.mmc_hc() {
            self.capacity = u32::from_le_bytes([
                ext_csd[212],
                ext_csd[213],
                ext_csd[214],
                ext_csd[215],
            ]);
        }
        Ok(())
    }

    fn negotiate_bus_width(&mut self) -> Result<(), SdMmcError> {
        let wired = self.config.bus_width;
        let width = if self.card_type.sd() && wired >= BusWidth::Four {
            self.host.send_command(cmd::APP_CMD, self.rca)?;
            self.host
                .send_command(cmd::SD_SET_BUS_WIDTH, arg::SD_BUS_4_BIT)?;
            BusWidth::Four
        } else if self.card_type.mmc_v4() && wired >= BusWidth::Four {
            let (switch_arg, width) = if wired == BusWidth::Eight {
                (arg::MMC_SWITCH_8_BIT_BUS, BusWidth::Eight)
            } else {
                (arg::MMC_SWITCH_4_BIT_BUS, BusWidth::Four)
            };
            self.host.send_command(cmd::MMC_SWITCH, switch_arg)?;
            self.host.wait_not_busy()?;
            width
        } else {
            return Ok(());
        };
        self.bus_width = width;
        self.host.set_bus_width(width);
        Ok(())
    }

    fn sd_switch_high_speed(&mut self) -> Result<(), SdMmcError> {
        let mut status = [0u8; SWITCH_STATUS_SIZE];
        self.host.set_block_size(SWITCH_STATUS_SIZE as u16);
        self.host.set_block_count(1);
        self.host
            .send_command(cmd::SD_SWITCH_FUNC, arg::SD_SWITCH_CHECK_HIGH_SPEED)?;
        self.read_data(&mut status)?;
        if status[16] & 0x0F != 1 {
            return Ok(());
        }
        self.host
            .send_command(cmd::SD_SWITCH_FUNC, arg::SD_SWITCH_SET_HIGH_SPEED)?;
        self.read_data(&mut status)?;
        // At least 8 card clock cycles at identification speed.
        self.host.delay_us(80);
        self.host.set_high_speed(true);

        self.host.send_command(cmd::DESELECT_CARD, 0)?;
        self.host.wait_not_busy()?;
        self.read_csd()?;
        self.host.send_command(cmd::SELECT_CARD, self.rca)?;
        self.host.wait_not_busy()?;
        Ok(())
    }

    fn set_block_len(&mut self, len: u16) -> Result<(), SdMmcError> {
        self.select();
        self.host.send_command(cmd::SET_BLOCKLEN, len as u32)?;
        let status = CardStatus::new_with_raw_value(self.host.response());
        if !status.is_tran_state() {
            return Err(SdMmcError::NotTransferState(status.raw_value()));
        }
        self.host.set_block_size(len);
        self.host.set_block_count(1);
        Ok(())
    }

    /// Read a data block word by word. Words arrive most significant byte first.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), SdMmcError> {
        for chunk in buf.chunks_mut(4) {
            let word = self.host.read_word()?.to_be_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> Result<(), SdMmcError> {
        for chunk in buf.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.host.write_word(u32::from_be_bytes(word))?;
        }
        Ok(())
    }

    /// CMD13.
    pub fn send_status(&mut self) -> Result<CardStatus, SdMmcError> {
        self.select();
        self.host.send_command(cmd::SEND_STATUS, self.rca)?;
        Ok(CardStatus::new_with_raw_value(self.host.response()))
    }

    /// Check that a card is present and initialize it if required.
    pub fn mem_check(&mut self) -> Result<(), SdMmcError> {
        self.select();
        if !self.lines.card_present() {
            self.init_done = false;
            return Err(SdMmcError::NotPresent);
        }
        let mut retries = 0;
        while let Err(e) = self.init() {
            retries += 1;
            if retries > MEM_CHECK_RETRIES {
                log::debug!("card init failed: {e}");
                return Err(e);
            }
        }
        Ok(())
    }

    fn open(
        &mut self,
        command: cmd::Command,
        sector: u32,
        count: u16,
        check_status: bool,
        dma: Option<DmaDirection>,
    ) -> Result<(), SdMmcError> {
        self.select();
        let addr = self.card_address(sector, count)?;
        self.host.wait_not_busy()?;
        if check_status {
            // Clears a pending address out of range error.
            self.host.send_command(cmd::SEND_STATUS, self.rca)?;
        }
        self.host.set_block_size(SECTOR_SIZE as u16);
        self.host.set_block_count(count);
        if let Some(direction) = dma {
            self.host.prepare_dma(direction);
        }
        self.host.send_command(command, addr)?;
        let status = CardStatus::new_with_raw_value(self.host.response());
        if status.has_rw_error() {
            return Err(SdMmcError::ReadWrite(status.raw_value()));
        }
        Ok(())
    }

    /// Start a multiple block read of `count` sectors.
    pub fn read_open(&mut self, sector: u32, count: u16) -> Result<(), SdMmcError> {
        self.open(cmd::READ_MULTIPLE_BLOCK, sector, count, true, None)
    }

    pub fn dma_read_open(&mut self, sector: u32, count: u16) -> Result<(), SdMmcError> {
        self.open(
            cmd::READ_MULTIPLE_BLOCK,
            sector,
            count,
            true,
            Some(DmaDirection::Read),
        )
    }

    /// Start a multiple block write of `count` sectors.
    pub fn write_open(&mut self, sector: u32, count: u16) -> Result<(), SdMmcError> {
        self.open(cmd::WRITE_MULTIPLE_BLOCK, sector, count, false, None)
    }

    pub fn dma_write_open(&mut self, sector: u32, count: u16) -> Result<(), SdMmcError> {
        self.open(
            cmd::WRITE_MULTIPLE_BLOCK,
            sector,
            count,
            false,
            Some(DmaDirection::Write),
        )
    }

    pub fn read_close(&mut self) -> Result<(), SdMmcError> {
        if self.host.crc_error() {
            return Err(SdMmcError::Crc);
        }
        self.host.wait_not_busy()?;
        self.host
            .send_command(cmd::STOP_READ_TRANSMISSION, arg::STOP_TRANSMISSION)?;
        Ok(())
    }

    pub fn write_close(&mut self) -> Result<(), SdMmcError> {
        if self.host.crc_error() {
            return Err(SdMmcError::Crc);
        }
        let mut polls = 0;
        while !self.host.data_block_ended() {
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(SdMmcError::Timeout);
            }
        }
        self.host
            .send_command(cmd::STOP_WRITE_TRANSMISSION, arg::STOP_TRANSMISSION)?;
        let mut polls = 0;
        while !self.lines.dat0_high() {
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(SdMmcError::Timeout);
            }
        }
        Ok(())
    }

    /// Read one sector of an opened read access.
    pub fn read_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), SdMmcError> {
        self.read_data(buf)
    }

    pub fn read_multiple_sectors(&mut self, buf: &mut [u8], count: usize) -> Result<(), SdMmcError> {
        if buf.len() != count * SECTOR_SIZE {
            return Err(SdMmcError::InvalidBuffer);
        }
        self.read_data(buf)
    }

    /// Write one sector of an opened write access.
    pub fn write_sector(&mut self, buf: &[u8; SECTOR_SIZE]) -> Result<(), SdMmcError> {
        self.write_data(buf)
    }

    pub fn write_multiple_sectors(&mut self, buf: &[u8], count: usize) -> Result<(), SdMmcError> {
        if buf.len() != count * SECTOR_SIZE {
            return Err(SdMmcError::InvalidBuffer);
        }
        self.write_data(buf)
    }

    fn wait_dma(&mut self) -> Result<(), SdMmcError> {
        let mut polls = 0;
        while !self.host.is_dma_complete() {
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(SdMmcError::Timeout);
            }
        }
        Ok(())
    }

    /// Read `count` sectors of an access opened with [Self::dma_read_open].
    pub fn dma_read_sectors(&mut self, buf: &mut [u8], count: usize) -> Result<(), SdMmcError> {
        if buf.len() != count * SECTOR_SIZE {
            return Err(SdMmcError::InvalidBuffer);
        }
        // The transfer completes before the buffer borrow ends.
        unsafe { self.host.start_read_dma(buf.as_mut_ptr(), buf.len())? };
        self.wait_dma()
    }

    /// Write `count` sectors of an access opened with [Self::dma_write_open].
    pub fn dma_write_sectors(&mut self, buf: &[u8], count: usize) -> Result<(), SdMmcError> {
        if buf.len() != count * SECTOR_SIZE {
            return Err(SdMmcError::InvalidBuffer);
        }
        unsafe { self.host.start_write_dma(buf.as_ptr(), buf.len())? };
        self.wait_dma()
    }

    /// CMD42 with the given password. Valid password lengths are up to 16 bytes.
    pub fn lock_unlock(&mut self, command: LockCommand, password: &[u8]) -> Result<(), SdMmcError> {
        if password.len() > 16 {
            return Err(SdMmcError::PasswordTooLong);
        }
        self.select();
        self.host.wait_not_busy()?;
        self.set_block_len(password.len() as u16 + 2)?;
        self.host.send_command(cmd::LOCK_UNLOCK, 0)?;
        let status = CardStatus::new_with_raw_value(self.host.response());
        if !status.is_tran_state() {
            return Err(SdMmcError::NotTransferState(status.raw_value()));
        }
        let mut block = [0u8; 18];
        let mut len = 0;
        block[len] = command as u8;
        len += 1;
        if command != LockCommand::FullErase {
            block[len] = password.len() as u8;
            len += 1;
        }
        block[len..len + password.len()].copy_from_slice(password);
        len += password.len();
        self.write_data(&block[..len])?;
        self.set_block_len(SECTOR_SIZE as u16)
    }

    /// A card which does not answer the status request is treated as locked.
    pub fn is_locked(&mut self) -> bool {
        self.send_status()
            .map(|status| status.card_is_locked())
            .unwrap_or(true)
    }

    pub fn lock_unlock_failed(&mut self) -> bool {
        self.send_status()
            .map(|status| status.lock_unlock_failed())
            .unwrap_or(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use super::*;
    use arbitrary_int::Number;
    use crate::usb::tests::{DmaEvent, DmaTrace};
    use std::vec::Vec;

    const SECTOR_WORDS: usize = SECTOR_SIZE / 4;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Model {
        SdV1,
        SdV2Hc,
        MmcV4Hc,
    }

    /// Simulated card behind a controller.
    pub struct MockHost {
        pub model: Model,
        pub log: Vec<(u8, u32)>,
        pub busy_polls: u32,
        pub app_cmd: bool,
        pub selected: bool,
        pub response: u32,
        pub response_136: [u32; 4],
        pub read_data: Vec<u32>,
        pub written: Vec<u32>,
        pub bus_width: BusWidth,
        pub speed: Hertz,
        pub high_speed: bool,
        pub sd_hs_supported: bool,
        pub locked: bool,
        pub dma_reads: Vec<usize>,
        pub dma_writes: Vec<usize>,
        pub prepared: Option<DmaDirection>,
        pub fail_cmd: Option<u8>,
        pub next_byte: u8,
        /// DMA starts fail.
        pub fail_dma: bool,
        /// Polls a started DMA transfer stays busy.
        pub dma_pending_polls: u32,
        /// Started DMA transfers never complete.
        pub dma_stuck: bool,
        dma_countdown: u32,
        dma_active: bool,
        pub trace: Option<DmaTrace>,
    }

    impl MockHost {
        pub fn new(model: Model) -> Self {
            Self {
                model,
                log: Vec::new(),
                busy_polls: 2,
                app_cmd: false,
                selected: false,
                response: 0,
                response_136: [0; 4],
                read_data: Vec::new(),
                written: Vec::new(),
                bus_width: BusWidth::One,
                speed: Hertz::from_raw(0),
                high_speed: false,
                sd_hs_supported: true,
                locked: false,
                dma_reads: Vec::new(),
                dma_writes: Vec::new(),
                prepared: None,
                fail_cmd: None,
                next_byte: 0,
                fail_dma: false,
                dma_pending_polls: 0,
                dma_stuck: false,
                dma_countdown: 0,
                dma_active: false,
                trace: None,
            }
        }

        fn start_dma(&mut self) -> Result<(), MciError> {
            if self.fail_dma {
                return Err(MciError::DataTimeout);
            }
            self.dma_countdown = self.dma_pending_polls;
            self.dma_active = true;
            if let Some(trace) = &self.trace {
                trace.borrow_mut().push(DmaEvent::CardStart);
            }
            Ok(())
        }

        fn is_mmc(&self) -> bool {
            self.model == Model::MmcV4Hc
        }

        fn tran_status(&self) -> u32 {
            let status = CardStatus::DEFAULT
                .with_current_state(u4::new(4))
                .with_ready_for_data(true)
                .with_card_is_locked(self.locked);
            status.raw_value()
        }

        fn csd(&self) -> [u32; 4] {
            let csd = match self.model {
                Model::SdV1 => Csd::DEFAULT
                    .with_tran_speed(0x32)
                    .with_read_bl_len(u4::new(9))
                    .with_write_bl_len(u4::new(9))
                    .with_c_size(u12::new(4095))
                    .with_c_size_mult(u3::new(7)),
                Model::SdV2Hc => Csd::DEFAULT
                    .with_csd_structure(u2::new(1))
                    .with_tran_speed(if self.high_speed { 0x5A } else { 0x32 })
                    .with_read_bl_len(u4::new(9))
                    .with_write_bl_len(u4::new(9))
                    .with_c_size_v2(u22::new(15159)),
                Model::MmcV4Hc => Csd::DEFAULT
                    .with_csd_structure(u2::new(3))
                    .with_spec_vers(u4::new(4))
                    .with_tran_speed(0x32)
                    .with_read_bl_len(u4::new(9))
                    .with_write_bl_len(u4::new(9))
                    .with_c_size(u12::new(4095))
                    .with_c_size_mult(u3::new(7)),
            };
            csd.to_words()
        }

        fn queue_bytes(&mut self, bytes: &[u8]) {
            for chunk in bytes.chunks(4) {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.read_data.push(u32::from_be_bytes(word));
            }
        }

        pub fn commands(&self) -> Vec<u8> {
            self.log.iter().map(|(index, _)| *index).collect()
        }
    }

    impl SdMmcHost for MockHost {
        fn init(&mut self) {
            self.bus_width = BusWidth::One;
            self.speed = INIT_SPEED;
            self.high_speed = false;
        }

        fn select_slot(&mut self, _slot: u8, bus_width: BusWidth) {
            self.bus_width = bus_width;
        }

        fn set_bus_width(&mut self, bus_width: BusWidth) {
            self.bus_width = bus_width;
        }

        fn set_speed(&mut self, speed: Hertz) {
            self.speed = speed;
        }

        fn set_high_speed(&mut self, enable: bool) {
            self.high_speed = enable;
        }

        fn send_command(&mut self, cmd: cmd::Command, arg: u32) -> Result<(), MciError> {
            if cmd.init_sequence {
                return Ok(());
            }
            self.log.push((cmd.index, arg));
            if self.fail_cmd == Some(cmd.index) {
                return Err(MciError::ResponseTimeout);
            }
            let app_cmd = core::mem::take(&mut self.app_cmd);
            match (cmd.index, app_cmd) {
                (0, _) => (),
                (1, _) => {
                    if !self.is_mmc() {
                        return Err(MciError::ResponseTimeout);
                    }
                    let ready = self.busy_polls == 0;
                    self.busy_polls = self.busy_polls.saturating_sub(1);
                    self.response = Ocr::DEFAULT
                        .with_ready(ready)
                        .with_high_capacity(true)
                        .raw_value();
                }
                (2, _) => self.response_136 = [0x1234_5678; 4],
                (3, _) => self.response = 0xB368_0500,
                (6, true) => self.response = self.tran_status(),
                (6, false) => {
                    self.response = self.tran_status();
                    if !self.is_mmc() {
                        let mut status = [0u8; 64];
                        if self.sd_hs_supported {
                            status[16] = 0x01;
                        }
                        self.queue_bytes(&status);
                    }
                }
                (7, _) => {
                    self.selected = arg != 0;
                    self.response = self.tran_status();
                }
                (8, _) => {
                    if self.is_mmc() {
                        let mut ext_csd = [0u8; 512];
                        ext_csd[196] = 0x03;
                        ext_csd[212..216].copy_from_slice(&7_733_248u32.to_le_bytes());
                        self.queue_bytes(&ext_csd);
                        self.response = self.tran_status();
                    } else if self.model == Model::SdV2Hc {
                        self.response = arg;
                    } else {
                        return Err(MciError::ResponseTimeout);
                    }
                }
                (9, _) => self.response_136 = self.csd(),
                (41, true) => {
                    if self.is_mmc() {
                        return Err(MciError::ResponseTimeout);
                    }
                    let ready = self.busy_polls == 0;
                    self.busy_polls = self.busy_polls.saturating_sub(1);
                    let hc = self.model == Model::SdV2Hc && arg & arg::OCR_HC != 0;
                    self.response = Ocr::DEFAULT
                        .with_ready(ready)
                        .with_high_capacity(hc)
                        .raw_value();
                }
                (55, _) => {
                    self.app_cmd = true;
                    self.response = self.tran_status() | 0x20;
                }
                (18, _) => {
                    self.response = self.tran_status();
                    // DMA reads are served by start_read_dma.
                    if self.prepared.take().is_none() {
                        let b = self.next_byte;
                        self.next_byte = self.next_byte.wrapping_add(1);
                        let word = u32::from_be_bytes([b, b, b, b]);
                        self.read_data.extend([word; SECTOR_WORDS]);
                    }
                }
                _ => self.response = self.tran_status(),
            }
            Ok(())
        }

        fn response(&mut self) -> u32 {
            self.response
        }

        fn response_136(&mut self) -> [u32; 4] {
            self.response_136
        }

        fn set_block_size(&mut self, _size: u16) {}

        fn set_block_count(&mut self, _count: u16) {}

        fn read_word(&mut self) -> Result<u32, MciError> {
            if self.read_data.is_empty() {
                return Err(MciError::DataTimeout);
            }
            Ok(self.read_data.remove(0))
        }

        fn write_word(&mut self, word: u32) -> Result<(), MciError> {
            self.written.push(word);
            Ok(())
        }

        fn wait_not_busy(&mut self) -> Result<(), MciError> {
            Ok(())
        }

        fn crc_error(&mut self) -> bool {
            false
        }

        fn data_block_ended(&mut self) -> bool {
            true
        }

        fn prepare_dma(&mut self, direction: DmaDirection) {
            self.prepared = Some(direction);
        }

        unsafe fn start_read_dma(&mut self, ram: *mut u8, len: usize) -> Result<(), MciError> {
            self.start_dma()?;
            let buf = unsafe { core::slice::from_raw_parts_mut(ram, len) };
            buf.fill(self.next_byte);
            self.next_byte = self.next_byte.wrapping_add(1);
            self.dma_reads.push(len);
            Ok(())
        }

        unsafe fn start_write_dma(&mut self, ram: *const u8, len: usize) -> Result<(), MciError> {
            self.start_dma()?;
            let buf = unsafe { core::slice::from_raw_parts(ram, len) };
            self.dma_writes.push(buf[0] as usize);
            Ok(())
        }

        fn is_dma_complete(&mut self) -> bool {
            if self.dma_stuck {
                return false;
            }
            if self.dma_countdown > 0 {
                self.dma_countdown -= 1;
                return false;
            }
            if core::mem::take(&mut self.dma_active) {
                if let Some(trace) = &self.trace {
                    trace.borrow_mut().push(DmaEvent::CardDone);
                }
            }
            true
        }

        fn delay_us(&mut self, _us: u32) {}
    }

    pub struct MockLines {
        pub present: bool,
        pub protected: bool,
    }

    impl SlotLines for MockLines {
        fn card_present(&mut self) -> bool {
            self.present
        }

        fn write_protected(&mut self) -> bool {
            self.protected
        }

        fn dat0_high(&mut self) -> bool {
            true
        }
    }

    pub fn card(model: Model, width: BusWidth) -> SdMmcCard<MockHost, MockLines> {
        SdMmcCard::new(
            MockHost::new(model),
            MockLines {
                present: true,
                protected: false,
            },
            SlotConfig::new(0, width),
        )
    }

    #[test]
    fn tran_state_and_errors() {
        assert!(CardStatus::new_with_raw_value(0x0000_0900).is_tran_state());
        assert!(!CardStatus::new_with_raw_value(0x0000_0700).is_tran_state());
        assert!(!CardStatus::new_with_raw_value(0x8000_0900).is_tran_state());
        assert!(CardStatus::new_with_raw_value(1 << 22).has_rw_error());
        assert!(!CardStatus::new_with_raw_value(1 << 25).has_rw_error());
        let status = CardStatus::new_with_raw_value(1 << 24);
        assert!(status.lock_unlock_failed());
        assert!(!status.card_is_locked());
    }

    #[test]
    fn csd_standard_capacity() {
        let csd = Csd::DEFAULT
            .with_tran_speed(0x32)
            .with_read_bl_len(u4::new(10))
            .with_write_bl_len(u4::new(9))
            .with_c_size(u12::new(1000))
            .with_c_size_mult(u3::new(5));
        // 1024 * 1001 * 128 / 512
        assert_eq!(csd.capacity_sectors(false).unwrap(), 256_256);
        assert_eq!(csd.frequency_khz(true).unwrap(), 25_000);
        assert_eq!(csd.frequency_khz(false).unwrap(), 26_000);
        let words = csd.to_words();
        assert_eq!(Csd::from_words(words).c_size().value(), 1000);
    }

    #[test]
    fn csd_high_capacity_and_small_blocks() {
        let csd = Csd::DEFAULT.with_c_size_v2(u22::new(15159));
        assert_eq!(csd.capacity_sectors(true).unwrap(), 15160 << 10);
        let csd = Csd::DEFAULT
            .with_read_bl_len(u4::new(8))
            .with_write_bl_len(u4::new(9));
        assert_eq!(
            csd.capacity_sectors(false),
            Err(SdMmcError::UnsupportedBlockLength)
        );
        let csd = Csd::DEFAULT.with_c_size_v2(u22::MAX);
        assert_eq!(csd.capacity_sectors(true).unwrap(), u32::MAX);
        let csd = Csd::DEFAULT.with_tran_speed(0x5C);
        assert_eq!(
            csd.frequency_khz(true),
            Err(SdMmcError::InvalidTransferSpeed(0x5C))
        );
    }

    #[test]
    fn init_sd_v2_high_capacity() {
        let mut card = card(Model::SdV2Hc, BusWidth::Four);
        card.init().unwrap();
        let card_type = card.card_type();
        assert!(card_type.sd());
        assert!(card_type.sd_v2());
        assert!(card_type.sd_hc());
        assert!(!card_type.mmc());
        assert_eq!(card.rca(), 0xB368_0000);
        assert_eq!(card.capacity(), 15160 << 10);
        assert_eq!(card.bus_width(), BusWidth::Four);
        assert_eq!(card.frequency_khz(), 50_000);
        assert!(card.host().high_speed);
        assert_eq!(card.host().speed.raw(), 50_000_000);
        assert!(card.is_initialized());
        let cmds = card.host().commands();
        assert_eq!(&cmds[..4], &[0, 1, 8, 55]);
        assert!(cmds.ends_with(&[13, 16]));
        assert!(card.host().log.contains(&(6, arg::SD_SWITCH_SET_HIGH_SPEED)));
        assert!(card.host().log.contains(&(7, 0)));
    }

    #[test]
    fn init_sd_v1_without_high_speed() {
        let mut card = card(Model::SdV1, BusWidth::One);
        card.init().unwrap();
        let card_type = card.card_type();
        assert!(card_type.sd());
        assert!(!card_type.sd_v2());
        assert!(!card_type.sd_hc());
        // 512 * 4096 * 512 / 512
        assert_eq!(card.capacity(), 4096 * 512);
        assert_eq!(card.bus_width(), BusWidth::One);
        assert_eq!(card.frequency_khz(), 25_000);
        // No ACMD41 with the HC bit for version 1 cards.
        assert!(
            card.host()
                .log
                .iter()
                .filter(|(index, _)| *index == 41)
                .all(|(_, arg)| arg & arg::OCR_HC == 0)
        );
        assert!(!card.host().log.contains(&(6, arg::SD_SWITCH_CHECK_HIGH_SPEED)));
    }

    #[test]
    fn init_mmc_v4_high_capacity() {
        let mut card = card(Model::MmcV4Hc, BusWidth::Eight);
        card.init().unwrap();
        let card_type = card.card_type();
        assert!(card_type.mmc());
        assert!(card_type.mmc_v4());
        assert!(card_type.mmc_hc());
        assert!(!card_type.sd());
        assert_eq!(card.rca(), arg::RCA_DEFAULT);
        assert_eq!(card.capacity(), 7_733_248);
        assert_eq!(card.frequency_khz(), 52_000);
        assert_eq!(card.bus_width(), BusWidth::Eight);
        assert!(card.host().log.contains(&(6, arg::MMC_SWITCH_8_BIT_BUS)));
        assert!(card.host().log.contains(&(6, arg::MMC_SWITCH_HS_TIMING)));
        assert!(!card.host().commands().contains(&55));
    }

    #[test]
    fn init_times_out_on_busy_card() {
        let mut card = card(Model::SdV2Hc, BusWidth::Four);
        card.host().busy_polls = u32::MAX;
        assert_eq!(card.init(), Err(SdMmcError::Timeout));
        assert!(!card.is_initialized());
    }

    #[test]
    fn mem_check_absent_and_retry() {
        let mut card = card(Model::SdV1, BusWidth::Four);
        card.lines().present = false;
        assert_eq!(card.mem_check(), Err(SdMmcError::NotPresent));
        card.lines().present = true;
        card.host().fail_cmd = Some(2);
        assert_eq!(
            card.mem_check(),
            Err(SdMmcError::Host(MciError::ResponseTimeout))
        );
        let cid_requests = card
            .host()
            .commands()
            .iter()
            .filter(|index| **index == 2)
            .count();
        assert_eq!(cid_requests as u32, MEM_CHECK_RETRIES + 1);
        card.host().fail_cmd = None;
        card.mem_check().unwrap();
        assert!(card.is_initialized());
    }

    #[test]
    fn read_open_translates_addresses() {
        let mut card = card(Model::SdV1, BusWidth::Four);
        card.init().unwrap();
        card.host().log.clear();
        card.read_open(10, 2).unwrap();
        assert_eq!(card.host().commands(), [13, 18]);
        assert_eq!(card.host().log[1].1, 10 << 9);

        let mut card = self::card(Model::SdV2Hc, BusWidth::Four);
        card.init().unwrap();
        card.host().log.clear();
        card.dma_write_open(10, 2).unwrap();
        assert_eq!(card.host().commands(), [25]);
        assert_eq!(card.host().log[0].1, 10);
        assert_eq!(card.host().prepared, Some(DmaDirection::Write));
    }

    #[test]
    fn pio_sector_read_and_close() {
        let mut card = card(Model::SdV2Hc, BusWidth::Four);
        card.init().unwrap();
        card.host().next_byte = 0xA5;
        card.read_open(0, 1).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        card.read_sector(&mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0xA5));
        card.read_close().unwrap();
        assert_eq!(card.host().log.last(), Some(&(12, arg::STOP_TRANSMISSION)));
    }

    #[test]
    fn open_rejects_sectors_beyond_capacity() {
        let mut card = card(Model::SdV1, BusWidth::Four);
        card.init().unwrap();
        let last = card.capacity() - 1;
        card.host().log.clear();
        card.read_open(last, 1).unwrap();
        assert_eq!(card.host().log[1], (18, last << 9));

        card.host().log.clear();
        assert_eq!(
            card.dma_write_open(0x0080_0000, 1),
            Err(SdMmcError::OutOfRange {
                sector: 0x0080_0000,
                count: 1
            })
        );
        assert!(matches!(
            card.write_open(last, 2),
            Err(SdMmcError::OutOfRange { .. })
        ));
        assert!(matches!(
            card.read_open(u32::MAX, 1),
            Err(SdMmcError::OutOfRange { .. })
        ));
        assert!(card.host().log.is_empty());
    }

    #[test]
    fn write_multiple_checks_buffer() {
        let mut card = card(Model::SdV2Hc, BusWidth::Four);
        card.init().unwrap();
        card.write_open(0, 2).unwrap();
        let buf = [0x11u8; SECTOR_SIZE];
        assert_eq!(
            card.write_multiple_sectors(&buf, 2),
            Err(SdMmcError::InvalidBuffer)
        );
        card.write_sector(&buf).unwrap();
        assert_eq!(card.host().written.len(), SECTOR_WORDS);
        assert_eq!(card.host().written[0], 0x1111_1111);
        card.write_close().unwrap();
    }

    #[test]
    fn lock_unlock_sequence() {
        let mut card = card(Model::SdV2Hc, BusWidth::Four);
        card.init().unwrap();
        card.host().log.clear();
        card.lock_unlock(LockCommand::Lock, &[0xAA, 0xBB]).unwrap();
        assert_eq!(card.host().log[0], (16, 4));
        assert_eq!(card.host().log[1], (42, 0));
        assert_eq!(card.host().log.last(), Some(&(16, 512)));
        assert_eq!(card.host().written, [0x0102_AABB]);

        card.host().written.clear();
        card.lock_unlock(LockCommand::FullErase, &[]).unwrap();
        assert_eq!(card.host().written, [0x0800_0000]);

        card.host().locked = true;
        assert!(card.is_locked());
        assert!(!card.lock_unlock_failed());
        card.host().fail_cmd = Some(13);
        assert!(card.is_locked());
        assert!(card.lock_unlock_failed());
    }
}
