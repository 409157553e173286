use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::card::{SdCard, SdCardError};

const DATA_START_TOKEN: u8 = 0xFE;
const TOKEN_POLLS: usize = 50_000;
const BUSY_POLLS: usize = 200_000;

impl<SPI, CS, DELAY> SdCard<SPI, CS, DELAY>
where
    SPI: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
{
    pub(crate) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdCardError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, true)
    }

    /// Like `send_command` but leaves the card selected for a data phase.
    pub(crate) fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdCardError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, false)
    }

    fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SdCardError<SPI::Error>> {
        let mut frame = [0x40 | cmd, 0, 0, 0, 0, crc];
        frame[1..5].copy_from_slice(&arg.to_be_bytes());

        self.cs.set_low().map_err(|_| SdCardError::ChipSelect)?;
        for byte in frame {
            self.transfer_byte(byte)?;
        }

        let mut r1 = None;
        for _ in 0..16 {
            let byte = self.transfer_byte(0xFF)?;
            if (byte & 0x80) == 0 {
                r1 = Some(byte);
                break;
            }
        }
        let Some(r1) = r1 else {
            self.end_transaction();
            return Err(SdCardError::NoResponse(cmd));
        };

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }
        if release_cs_after {
            self.end_transaction();
        }
        Ok(r1)
    }

    pub(crate) fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdCardError<SPI::Error>> {
        for _ in 0..bytes {
            self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdCardError<SPI::Error>> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .map_err(SdCardError::Spi)?;
        Ok(frame[0])
    }

    /// Waits for the start token after `cmd`, then fills `out` and drops the CRC.
    pub(crate) fn read_data(
        &mut self,
        cmd: u8,
        out: &mut [u8],
    ) -> Result<(), SdCardError<SPI::Error>> {
        let mut token = 0xFF;
        for _ in 0..TOKEN_POLLS {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                break;
            }
        }
        match token {
            DATA_START_TOKEN => {}
            0xFF => return Err(SdCardError::DataTokenTimeout(cmd)),
            other => return Err(SdCardError::DataTokenUnexpected(cmd, other)),
        }

        out.fill(0xFF);
        self.spi.transfer_in_place(out).map_err(SdCardError::Spi)?;
        self.transfer_byte(0xFF)?;
        self.transfer_byte(0xFF)?;
        Ok(())
    }

    /// Sends one data block after CMD24 and waits out the programming busy phase.
    pub(crate) fn write_data(&mut self, data: &[u8]) -> Result<(), SdCardError<SPI::Error>> {
        self.transfer_byte(0xFF)?;
        self.transfer_byte(DATA_START_TOKEN)?;
        self.spi.write(data).map_err(SdCardError::Spi)?;
        // CRC is not checked in SPI mode unless enabled with CMD59.
        self.transfer_byte(0xFF)?;
        self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != 0x05 {
            return Err(SdCardError::WriteDataRejected(response));
        }
        for _ in 0..BUSY_POLLS {
            if self.transfer_byte(0xFF)? == 0xFF {
                return Ok(());
            }
        }
        Err(SdCardError::WriteBusyTimeout)
    }

    pub(crate) fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }
}
