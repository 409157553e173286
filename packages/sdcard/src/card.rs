use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use log::{info, warn};
use sdfat::{Block, BlockDevice};

use crate::csd::decode_capacity_bytes;

const SD_CMD0: u8 = 0;
const SD_CMD8: u8 = 8;
const SD_CMD9: u8 = 9;
const SD_CMD16: u8 = 16;
const SD_CMD17: u8 = 17;
const SD_CMD24: u8 = 24;
const SD_CMD55: u8 = 55;
const SD_ACMD41: u8 = 41;
const SD_CMD58: u8 = 58;
pub const SD_SECTOR_SIZE: usize = 512;

const ACMD41_ATTEMPTS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardVersion {
    V1,
    V2,
}

/// What `init` learned about the card.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardInfo {
    pub version: CardVersion,
    /// Block addressed (SDHC/SDXC) rather than byte addressed.
    pub high_capacity: bool,
    pub capacity_bytes: u64,
}

impl CardInfo {
    pub fn block_count(&self) -> u32 {
        u32::try_from(self.capacity_bytes / SD_SECTOR_SIZE as u64).unwrap_or(u32::MAX)
    }
}

#[derive(Debug)]
pub enum SdCardError<E> {
    Spi(E),
    ChipSelect,
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
    OutOfRange(u32),
}

impl<E: fmt::Debug> fmt::Display for SdCardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spi(err) => write!(f, "spi error: {err:?}"),
            Self::ChipSelect => f.write_str("chip select pin error"),
            Self::NoResponse(cmd) => write!(f, "no response to CMD{cmd}"),
            Self::DataTokenTimeout(cmd) => write!(f, "no data token after CMD{cmd}"),
            Self::DataTokenUnexpected(cmd, token) => {
                write!(f, "unexpected data token {token:#04x} after CMD{cmd}")
            }
            Self::WriteDataRejected(response) => write!(f, "write rejected: {response:#04x}"),
            Self::WriteBusyTimeout => f.write_str("card stayed busy after write"),
            Self::NotInitialized => f.write_str("card not initialized"),
            Self::CapacityDecodeFailed => f.write_str("unsupported CSD"),
            Self::OutOfRange(block) => write!(f, "block {block} past end of card"),
            other => write!(f, "unexpected command response: {other:?}"),
        }
    }
}

pub struct SdCard<SPI, CS, DELAY> {
    pub(crate) spi: SPI,
    pub(crate) cs: CS,
    delay: DELAY,
    info: Option<CardInfo>,
}

impl<SPI, CS, DELAY> SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, mut cs: CS, delay: DELAY) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            delay,
            info: None,
        }
    }

    pub fn info(&self) -> Option<CardInfo> {
        self.info
    }

    pub fn is_initialized(&self) -> bool {
        self.info.is_some()
    }

    /// Forget the card, e.g. after it lost power. `init` must run again.
    pub fn invalidate(&mut self) {
        self.info = None;
    }

    pub fn spi_mut(&mut self) -> &mut SPI {
        &mut self.spi
    }

    pub fn release(self) -> (SPI, CS, DELAY) {
        (self.spi, self.cs, self.delay)
    }

    /// Brings the card from power-up into SPI transfer state.
    pub fn init(&mut self) -> Result<CardInfo, SdCardError<SPI::Error>> {
        self.info = None;
        let result = self.init_inner();
        match &result {
            Ok(card) => info!(
                "sdcard: init version={:?} high_capacity={} capacity_bytes={}",
                card.version, card.high_capacity, card.capacity_bytes
            ),
            Err(err) => warn!("sdcard: init failed err={:?}", err),
        }
        result
    }

    fn init_inner(&mut self) -> Result<CardInfo, SdCardError<SPI::Error>> {
        let _ = self.cs.set_high();
        self.send_dummy_clocks(10)?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..16 {
            cmd0_r1 = self.send_command(SD_CMD0, 0, 0x95, &mut [])?;
            if cmd0_r1 == 0x01 {
                break;
            }
        }
        if cmd0_r1 != 0x01 {
            return Err(SdCardError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.send_command(SD_CMD8, 0x0000_01AA, 0x87, &mut r7)?;
        let version = if cmd8_r1 == 0x01 {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                return Err(SdCardError::Cmd8EchoMismatch(r7));
            }
            CardVersion::V2
        } else if (cmd8_r1 & 0x04) != 0 {
            CardVersion::V1
        } else {
            return Err(SdCardError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = if version == CardVersion::V2 {
            0x4000_0000
        } else {
            0
        };
        let mut acmd41_r1 = 0xFFu8;
        for _ in 0..ACMD41_ATTEMPTS {
            self.send_command(SD_CMD55, 0, 0x65, &mut [])?;
            acmd41_r1 = self.send_command(SD_ACMD41, acmd41_arg, 0x77, &mut [])?;
            if acmd41_r1 == 0x00 {
                break;
            }
            self.delay.delay_ms(1);
        }
        if acmd41_r1 != 0x00 {
            return Err(SdCardError::Acmd41Timeout(acmd41_r1));
        }

        if version == CardVersion::V1 {
            let cmd16_r1 = self.send_command(SD_CMD16, SD_SECTOR_SIZE as u32, 0xFF, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdCardError::Cmd16Unexpected(cmd16_r1));
            }
        }

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdCardError::Cmd58Unexpected(cmd58_r1));
        }

        let mut csd = [0u8; 16];
        let cmd9_r1 = self.send_command_hold_cs(SD_CMD9, 0, 0xAF, &mut [])?;
        if cmd9_r1 != 0x00 {
            self.end_transaction();
            return Err(SdCardError::Cmd9Unexpected(cmd9_r1));
        }
        let read = self.read_data(SD_CMD9, &mut csd);
        self.end_transaction();
        read?;

        let card = CardInfo {
            version,
            high_capacity: (ocr[0] & 0x40) != 0,
            capacity_bytes: decode_capacity_bytes(&csd).ok_or(SdCardError::CapacityDecodeFailed)?,
        };
        self.info = Some(card);
        Ok(card)
    }

    fn address_of(&self, block: u32) -> Result<u32, SdCardError<SPI::Error>> {
        let card = self.info.ok_or(SdCardError::NotInitialized)?;
        if block >= card.block_count() {
            return Err(SdCardError::OutOfRange(block));
        }
        Ok(if card.high_capacity {
            block
        } else {
            block.saturating_mul(SD_SECTOR_SIZE as u32)
        })
    }
}

impl<SPI, CS, DELAY> BlockDevice for SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
{
    type Error = SdCardError<SPI::Error>;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), Self::Error> {
        let arg = self.address_of(block)?;
        let cmd17_r1 = self.send_command_hold_cs(SD_CMD17, arg, 0xFF, &mut [])?;
        if cmd17_r1 != 0x00 {
            self.end_transaction();
            return Err(SdCardError::Cmd17Unexpected(cmd17_r1));
        }
        let read = self.read_data(SD_CMD17, buf);
        self.end_transaction();
        read
    }

    fn write_block(&mut self, block: u32, buf: &Block) -> Result<(), Self::Error> {
        let arg = self.address_of(block)?;
        let cmd24_r1 = self.send_command_hold_cs(SD_CMD24, arg, 0xFF, &mut [])?;
        if cmd24_r1 != 0x00 {
            self.end_transaction();
            return Err(SdCardError::Cmd24Unexpected(cmd24_r1));
        }
        let written = self.write_data(buf);
        self.end_transaction();
        written
    }
}
