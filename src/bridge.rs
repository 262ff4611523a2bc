//! Driver for the DS2482-100 one-wire bridge.
//!
//! The bridge translates register commands received over I2C into one-wire
//! signaling. This board wires neither its interrupt nor its status line, so
//! every command is followed by a fixed settle delay instead of polling the
//! status register, and a one-wire read is sampled by pointing the read
//! register at the data register afterwards.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::config;

/// Transport failure on the I2C leg or the one-wire leg behind it. Carries no
/// detail; callers redo the full command sequence instead of retrying a step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct BusError;

#[allow(dead_code)]
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum Command {
    OneWireReadByte = 0x96,
    OneWireWriteByte = 0xa5,
    OneWireReset = 0xb4,
    WriteConfiguration = 0xd2,
    SetReadPointer = 0xe1,
    DeviceReset = 0xf0,
}

#[allow(dead_code)]
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ReadPointer {
    Status = 0xf0,
    ReadData = 0xe1,
    Configuration = 0xc3,
}

const CONFIG_ACTIVE_PULLUP: u8 = 0b0001;

// The configuration register wants the nibble repeated inverted in the upper
// half as a transmission check.
fn configuration_byte(nibble: u8) -> u8 {
    (nibble & 0xf) | (!nibble & 0xf) << 4
}

pub struct Ds2482<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C, D> Ds2482<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    /// Resets the bridge itself and enables the active pullup. Must run once
    /// before any one-wire traffic.
    pub async fn initialize(&mut self) -> Result<(), BusError> {
        self.command(Command::DeviceReset, None).await?;
        self.delay.delay_us(config::BRIDGE_RESET_SETTLE_US).await;

        let byte = configuration_byte(CONFIG_ACTIVE_PULLUP);
        self.command(Command::WriteConfiguration, Some(byte)).await?;
        self.delay.delay_us(config::REGISTER_SETTLE_US).await;
        Ok(())
    }

    /// Issues a one-wire reset/presence cycle. Begins and ends a transaction;
    /// every command sequence on the wire starts here.
    pub async fn reset(&mut self) -> Result<(), BusError> {
        self.command(Command::OneWireReset, None).await?;
        self.delay.delay_us(config::ONEWIRE_RESET_SETTLE_US).await;
        Ok(())
    }

    pub async fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        self.command(Command::OneWireWriteByte, Some(byte)).await?;
        self.delay.delay_us(config::ONEWIRE_BYTE_SETTLE_US).await;
        Ok(())
    }

    pub async fn read_byte(&mut self) -> Result<u8, BusError> {
        self.command(Command::OneWireReadByte, None).await?;
        // The byte is clocked in during this settle window; only then is the
        // data register valid for sampling.
        self.delay.delay_us(config::ONEWIRE_BYTE_SETTLE_US).await;

        self.set_read_pointer(ReadPointer::ReadData).await?;
        let mut buf = [0u8; 1];
        self.i2c
            .read(self.address, &mut buf)
            .await
            .map_err(|_| BusError)?;
        Ok(buf[0])
    }

    /// Selects which bridge register subsequent I2C reads return.
    pub async fn set_read_pointer(&mut self, register: ReadPointer) -> Result<(), BusError> {
        self.command(Command::SetReadPointer, Some(register as u8))
            .await?;
        self.delay.delay_us(config::REGISTER_SETTLE_US).await;
        Ok(())
    }

    /// Plain wait on the injected delay source, for device-side timing such
    /// as the EEPROM programming window.
    pub async fn wait_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms).await;
    }

    async fn command(&mut self, command: Command, payload: Option<u8>) -> Result<(), BusError> {
        let result = match payload {
            Some(payload) => {
                self.i2c
                    .write(self.address, &[command as u8, payload])
                    .await
            }
            None => self.i2c.write(self.address, &[command as u8]).await,
        };
        result.map_err(|_| BusError)
    }
}
