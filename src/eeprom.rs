//! One-wire EEPROM protocol driver (DS2431 class, 128 bytes).
//!
//! All traffic goes through the [`Ds2482`] bridge one byte at a time. A
//! durable write is staged in the device's 8-byte scratchpad and committed
//! with the authorization code echoed back by a scratchpad read; nothing is
//! stored until that copy command lands.

use crate::bridge::{BusError, Ds2482};
use crate::config;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

pub const ROW_SIZE: u16 = 8;
pub const PAGE_SIZE: u16 = 32;
pub const ROW_COUNT: u8 = 16;
pub const ROWS_PER_PAGE: u8 = 4;
pub const MEMORY_SIZE: u16 = 128;

/// The device transmits the inverted one-wire CRC16 after a scratchpad write.
const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MAXIM_DOW);

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum RomCommand {
    ReadRom = 0x33,
    SkipRom = 0xcc,
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum MemoryCommand {
    WriteScratchpad = 0x0f,
    CopyScratchpad = 0x55,
    ReadScratchpad = 0xaa,
    ReadMemory = 0xf0,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Error {
    /// Bus failure on any step; flips the connect latch off.
    Transport,
    /// Scratchpad write CRC16 did not match what the device echoed.
    Crc,
    /// Address or row outside the device; detected before any bus traffic.
    Address,
    /// Transport succeeded but the ROM id was mostly 0xff filler.
    NoDevice,
    /// Write or clear refused while the connect latch is off.
    Disconnected,
    /// A verify read-back did not match the written pattern.
    Verify,
}

impl From<BusError> for Error {
    fn from(_: BusError) -> Self {
        Error::Transport
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum ConnectStatus {
    On,
    Off,
}

/// Factory-programmed 64-bit identifier; zero when the device is unreachable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct RomId(u64);

impl RomId {
    pub const ZERO: RomId = RomId(0);

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        RomId(u64::from_le_bytes(bytes))
    }

    pub fn bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The four parameter pages, 32 bytes each, at fixed base addresses.
#[repr(u8)]
#[derive(num_derive::FromPrimitive, Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Page {
    Identification = 1,
    WeldTime = 2,
    TorchType = 3,
    Production = 4,
}

impl Page {
    pub const ALL: [Page; 4] = [
        Page::Identification,
        Page::WeldTime,
        Page::TorchType,
        Page::Production,
    ];

    pub const fn base_address(self) -> u16 {
        (self as u16 - 1) * PAGE_SIZE
    }

    pub fn from_selector(selector: u8) -> Option<Page> {
        use num_traits::FromPrimitive as _;
        Page::from_u8(selector)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Page(Page),
    All,
}

/// The 13 bytes a scratchpad read returns: the 3-byte authorization code
/// (echoed target address plus status), the staged data, and the CRC16.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScratchpadReadout {
    pub auth: [u8; 3],
    pub data: [u8; 8],
    pub crc: [u8; 2],
}

pub struct Eeprom<I2C, D> {
    bridge: Ds2482<I2C, D>,
    status: ConnectStatus,
}

impl<I2C, D> Eeprom<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Starts latched off; a successful [`read_rom_id`](Self::read_rom_id)
    /// turns the latch on.
    pub fn new(bridge: Ds2482<I2C, D>) -> Self {
        Self {
            bridge,
            status: ConnectStatus::Off,
        }
    }

    pub fn connect_status(&self) -> ConnectStatus {
        self.status
    }

    pub async fn initialize(&mut self) -> Result<(), Error> {
        let result = self.bridge.initialize().await;
        self.bus(result)
    }

    /// Stages 8 bytes in the scratchpad and checks the echoed CRC16. The
    /// scratchpad contents are unknown after any error.
    pub async fn write_scratchpad(&mut self, address: u16, data: &[u8; 8]) -> Result<[u8; 2], Error> {
        check_span(address, ROW_SIZE)?;

        let [ta1, ta2] = address.to_le_bytes();
        self.begin(RomCommand::SkipRom).await?;
        self.send(MemoryCommand::WriteScratchpad as u8).await?;
        self.send(ta1).await?;
        self.send(ta2).await?;
        for &byte in data {
            self.send(byte).await?;
        }

        let crc = [self.receive().await?, self.receive().await?];

        let mut digest = CRC16.digest();
        digest.update(&[MemoryCommand::WriteScratchpad as u8, ta1, ta2]);
        digest.update(data);
        if crc != digest.finalize().to_le_bytes() {
            return Err(Error::Crc);
        }
        Ok(crc)
    }

    pub async fn read_scratchpad(&mut self) -> Result<ScratchpadReadout, Error> {
        self.begin(RomCommand::SkipRom).await?;
        self.send(MemoryCommand::ReadScratchpad as u8).await?;

        let mut readout = ScratchpadReadout {
            auth: [0; 3],
            data: [0; 8],
            crc: [0; 2],
        };
        for byte in readout.auth.iter_mut() {
            *byte = self.receive().await?;
        }
        for byte in readout.data.iter_mut() {
            *byte = self.receive().await?;
        }
        for byte in readout.crc.iter_mut() {
            *byte = self.receive().await?;
        }
        Ok(readout)
    }

    /// Commits the scratchpad to the address encoded in the authorization
    /// code. The status byte (0xaa on success) is returned unchecked; the
    /// transport result alone decides the outcome.
    pub async fn copy_scratchpad(&mut self, auth: [u8; 3]) -> Result<u8, Error> {
        self.begin(RomCommand::SkipRom).await?;
        self.send(MemoryCommand::CopyScratchpad as u8).await?;
        for &byte in &auth {
            self.send(byte).await?;
        }

        self.bridge.wait_ms(config::COPY_PROGRAM_WAIT_MS).await;
        self.receive().await
    }

    /// One logical durable write: stage, read the authorization code back,
    /// commit. Three strictly sequential bus round-trips.
    pub async fn write_memory(&mut self, address: u16, data: &[u8; 8]) -> Result<(), Error> {
        if let ConnectStatus::Off = self.status {
            return Err(Error::Disconnected);
        }
        self.write_scratchpad(address, data).await?;
        let readout = self.read_scratchpad().await?;
        self.copy_scratchpad(readout.auth).await?;
        Ok(())
    }

    pub async fn read_memory(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Error> {
        check_span(address, buf.len() as u16)?;

        let [ta1, ta2] = address.to_le_bytes();
        self.begin(RomCommand::SkipRom).await?;
        self.send(MemoryCommand::ReadMemory as u8).await?;
        self.send(ta1).await?;
        self.send(ta2).await?;
        for byte in buf.iter_mut() {
            *byte = self.receive().await?;
        }
        Ok(())
    }

    pub async fn write_row(&mut self, row: u8, data: &[u8; 8]) -> Result<(), Error> {
        self.write_memory(row_address(row)?, data).await
    }

    pub async fn read_row(&mut self, row: u8) -> Result<[u8; 8], Error> {
        let mut buf = [0u8; 8];
        self.read_memory(row_address(row)?, &mut buf).await?;
        Ok(buf)
    }

    pub async fn write_row_with_offset(
        &mut self,
        page: Page,
        data: &[u8; 8],
        offset: u8,
    ) -> Result<(), Error> {
        self.write_memory(offset_address(page, offset)?, data).await
    }

    pub async fn read_row_with_offset(&mut self, page: Page, offset: u8) -> Result<[u8; 8], Error> {
        let mut buf = [0u8; 8];
        self.read_memory(offset_address(page, offset)?, &mut buf)
            .await?;
        Ok(buf)
    }

    /// Zeroes the target rows one durable write at a time. Refused without
    /// bus traffic while the latch is off.
    pub async fn clear(&mut self, target: ClearTarget) -> Result<(), Error> {
        if let ConnectStatus::Off = self.status {
            return Err(Error::Disconnected);
        }

        const ZERO_ROW: [u8; 8] = [0; 8];
        match target {
            ClearTarget::Page(page) => {
                for offset in 0..ROWS_PER_PAGE {
                    self.write_row_with_offset(page, &ZERO_ROW, offset).await?;
                }
            }
            ClearTarget::All => {
                for row in 1..=ROW_COUNT {
                    self.write_row(row, &ZERO_ROW).await?;
                }
            }
        }
        Ok(())
    }

    /// Reads the 64-bit ROM id. A transport-clean response that is mostly
    /// 0xff filler still counts as an absent device and latches off.
    pub async fn read_rom_id(&mut self) -> Result<RomId, Error> {
        self.begin(RomCommand::ReadRom).await?;

        let mut bytes = [0u8; 8];
        for byte in bytes.iter_mut() {
            *byte = self.receive().await?;
        }

        let filler = bytes.iter().filter(|&&b| b == 0xff).count();
        if filler >= 6 {
            self.status = ConnectStatus::Off;
            return Err(Error::NoDevice);
        }
        self.status = ConnectStatus::On;
        Ok(RomId::from_bytes(bytes))
    }

    /// Production storage check: clear everything, write the 28-value test
    /// pattern across all four pages, wait, then read every row back against
    /// a zeroed shadow.
    pub async fn verify(&mut self) -> Result<(), Error> {
        self.clear(ClearTarget::All).await?;

        for row in 0..ROW_COUNT as usize {
            let mut data = [0u8; 8];
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = verify_pattern(row * 8 + i);
            }
            self.write_row(row as u8 + 1, &data).await?;
        }

        self.bridge.wait_ms(config::VERIFY_SETTLE_MS).await;

        let mut shadow = [[0u8; 8]; ROW_COUNT as usize];
        for (row, slot) in shadow.iter_mut().enumerate() {
            *slot = self.read_row(row as u8 + 1).await?;
        }

        for (row, slot) in shadow.iter().enumerate() {
            for (i, &byte) in slot.iter().enumerate() {
                if byte != verify_pattern(row * 8 + i) {
                    return Err(Error::Verify);
                }
            }
        }
        Ok(())
    }

    async fn begin(&mut self, rom: RomCommand) -> Result<(), Error> {
        let result = self.bridge.reset().await;
        self.bus(result)?;
        self.send(rom as u8).await
    }

    async fn send(&mut self, byte: u8) -> Result<(), Error> {
        let result = self.bridge.write_byte(byte).await;
        self.bus(result)
    }

    async fn receive(&mut self) -> Result<u8, Error> {
        let result = self.bridge.read_byte().await;
        self.bus(result)
    }

    fn bus<T>(&mut self, result: Result<T, BusError>) -> Result<T, Error> {
        match result {
            Ok(value) => Ok(value),
            Err(BusError) => {
                self.status = ConnectStatus::Off;
                Err(Error::Transport)
            }
        }
    }
}

/// The 28 distinct non-zero test values, cycled across the 128 data bytes.
fn verify_pattern(index: usize) -> u8 {
    ((index % 28) as u8 + 1).wrapping_mul(9)
}

fn row_address(row: u8) -> Result<u16, Error> {
    if (1..=ROW_COUNT).contains(&row) {
        Ok((row as u16 - 1) * ROW_SIZE)
    } else {
        Err(Error::Address)
    }
}

fn offset_address(page: Page, offset: u8) -> Result<u16, Error> {
    if offset < ROWS_PER_PAGE {
        Ok(page.base_address() + offset as u16 * ROW_SIZE)
    } else {
        Err(Error::Address)
    }
}

fn check_span(address: u16, len: u16) -> Result<(), Error> {
    if address.checked_add(len).is_some_and(|end| end <= MEMORY_SIZE) {
        Ok(())
    } else {
        Err(Error::Address)
    }
}
