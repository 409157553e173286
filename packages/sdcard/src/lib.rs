//! SD/SDHC card in SPI mode as a 512-byte block device for `sdfat`.
//!
//! Run the bus at 400 kHz or less until [`SdCard::init`] returns; the data
//! phase can go faster through [`SdCard::spi_mut`].
#![cfg_attr(not(test), no_std)]

mod card;
mod csd;
mod transport;

pub use card::{CardInfo, CardVersion, SdCard, SdCardError, SD_SECTOR_SIZE};
