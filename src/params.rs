//! In-memory model of the four configuration pages.
//!
//! Each page is 32 bytes of raw rows with typed little-endian accessors on
//! top, so a partially failed page read still leaves the rows that did arrive
//! applied. The store is the only writer of the pages; the device side is
//! reached through [`Eeprom`] row-with-offset operations.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::eeprom::{Eeprom, Error, Page, ROWS_PER_PAGE};

/// Marker in Page1 row 0 identifying a provisioned board ("TRCH").
pub const IDENT_MARKER: u32 = u32::from_le_bytes(*b"TRCH");

/// Page3 stores this when the one-shot torch type has been committed.
const TORCH_WRITTEN_FLAG: u32 = 1;

/// Reserved code meaning "no torch type programmed yet".
pub const TORCH_CODE_UNDEFINED: u32 = 0;

#[repr(u32)]
#[derive(num_derive::FromPrimitive, Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TorchKind {
    Undefined = 0,
    AirCooled = 1,
    WaterCooled = 2,
    PushPull = 3,
}

pub const DEFAULT_TORCH_KIND: TorchKind = TorchKind::AirCooled;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TorchTypeWrite {
    Written,
    /// The one-shot flag was already set; nothing touched the bus.
    AlreadyWritten,
}

type Rows = [[u8; 8]; ROWS_PER_PAGE as usize];

fn get_u32(rows: &Rows, row: usize, offset: usize) -> u32 {
    let bytes = &rows[row][offset..offset + 4];
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn put_u32(rows: &mut Rows, row: usize, offset: usize, value: u32) {
    rows[row][offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(rows: &Rows, row: usize, offset: usize) -> u16 {
    u16::from_le_bytes([rows[row][offset], rows[row][offset + 1]])
}

fn put_u16(rows: &mut Rows, row: usize, offset: usize, value: u16) {
    rows[row][offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Page1: identification and version marker.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct IdentPage {
    rows: Rows,
}

impl IdentPage {
    pub fn marker(&self) -> u32 {
        get_u32(&self.rows, 0, 0)
    }

    pub fn set_marker(&mut self, marker: u32) {
        put_u32(&mut self.rows, 0, 0, marker);
    }

    pub fn hw_version(&self) -> u16 {
        get_u16(&self.rows, 0, 4)
    }

    pub fn set_hw_version(&mut self, version: u16) {
        put_u16(&mut self.rows, 0, 4, version);
    }

    pub fn fw_version(&self) -> u16 {
        get_u16(&self.rows, 0, 6)
    }

    pub fn set_fw_version(&mut self, version: u16) {
        put_u16(&mut self.rows, 0, 6, version);
    }

    pub fn serial(&self) -> u32 {
        get_u32(&self.rows, 1, 0)
    }

    pub fn set_serial(&mut self, serial: u32) {
        put_u32(&mut self.rows, 1, 0, serial);
    }
}

/// Page2: the weld-time failsafe value, stored twice.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct WeldTimePage {
    rows: Rows,
}

impl WeldTimePage {
    pub fn weld_time_ms(&self) -> u32 {
        get_u32(&self.rows, 0, 0)
    }

    pub fn weld_time_backup_ms(&self) -> u32 {
        get_u32(&self.rows, 0, 4)
    }

    /// Stores both redundant copies.
    pub fn set_weld_time_ms(&mut self, ms: u32) {
        put_u32(&mut self.rows, 0, 0, ms);
        put_u32(&mut self.rows, 0, 4, ms);
    }

    /// The failsafe is only trusted when both copies agree.
    pub fn consistent(&self) -> bool {
        self.weld_time_ms() == self.weld_time_backup_ms()
    }
}

/// Page3: one-shot written flag plus the torch-type code.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TorchTypePage {
    rows: Rows,
}

impl TorchTypePage {
    pub fn written(&self) -> bool {
        get_u32(&self.rows, 0, 0) != 0
    }

    pub fn mark_written(&mut self) {
        put_u32(&mut self.rows, 0, 0, TORCH_WRITTEN_FLAG);
    }

    pub fn code(&self) -> u32 {
        get_u32(&self.rows, 1, 0)
    }

    pub fn set_code(&mut self, code: u32) {
        put_u32(&mut self.rows, 1, 0, code);
    }
}

/// Page4: production self-test scratch space, kept raw.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ProductionPage {
    rows: Rows,
}

impl ProductionPage {
    pub fn rows(&self) -> &Rows {
        &self.rows
    }
}

pub struct ParameterStore {
    pub ident: IdentPage,
    pub weld: WeldTimePage,
    pub torch: TorchTypePage,
    pub production: ProductionPage,
    torch_kind: TorchKind,
}

impl ParameterStore {
    pub const fn new() -> Self {
        Self {
            ident: IdentPage { rows: [[0; 8]; 4] },
            weld: WeldTimePage { rows: [[0; 8]; 4] },
            torch: TorchTypePage { rows: [[0; 8]; 4] },
            production: ProductionPage { rows: [[0; 8]; 4] },
            torch_kind: TorchKind::Undefined,
        }
    }

    pub fn torch_kind(&self) -> TorchKind {
        self.torch_kind
    }

    fn rows_for(&self, page: Page) -> &Rows {
        match page {
            Page::Identification => &self.ident.rows,
            Page::WeldTime => &self.weld.rows,
            Page::TorchType => &self.torch.rows,
            Page::Production => &self.production.rows,
        }
    }

    fn rows_for_mut(&mut self, page: Page) -> &mut Rows {
        match page {
            Page::Identification => &mut self.ident.rows,
            Page::WeldTime => &mut self.weld.rows,
            Page::TorchType => &mut self.torch.rows,
            Page::Production => &mut self.production.rows,
        }
    }

    /// Copies one page from the device into the shadow, row by row. Rows that
    /// arrived before a failure stay applied.
    pub async fn read_page<I2C, D>(
        &mut self,
        eeprom: &mut Eeprom<I2C, D>,
        page: Page,
    ) -> Result<(), Error>
    where
        I2C: I2c,
        D: DelayNs,
    {
        for offset in 0..ROWS_PER_PAGE {
            let row = eeprom.read_row_with_offset(page, offset).await?;
            self.rows_for_mut(page)[offset as usize] = row;
        }
        Ok(())
    }

    pub async fn write_page<I2C, D>(
        &mut self,
        eeprom: &mut Eeprom<I2C, D>,
        page: Page,
    ) -> Result<(), Error>
    where
        I2C: I2c,
        D: DelayNs,
    {
        for offset in 0..ROWS_PER_PAGE {
            let row = self.rows_for(page)[offset as usize];
            eeprom.write_row_with_offset(page, &row, offset).await?;
        }
        Ok(())
    }

    /// Boot-time load: all four pages in order, aborting on the first
    /// failure. Seeds the default torch kind when Page3 holds the reserved
    /// undefined code.
    pub async fn init<I2C, D>(&mut self, eeprom: &mut Eeprom<I2C, D>) -> Result<(), Error>
    where
        I2C: I2c,
        D: DelayNs,
    {
        for page in Page::ALL {
            self.read_page(eeprom, page).await?;
        }

        self.torch_kind = match self.torch.code() {
            TORCH_CODE_UNDEFINED => DEFAULT_TORCH_KIND,
            code => decode_torch_kind(code),
        };
        Ok(())
    }

    /// One-shot torch type commit. Once the flag is set the stored value
    /// never changes again.
    pub async fn write_torch_type<I2C, D>(
        &mut self,
        eeprom: &mut Eeprom<I2C, D>,
        code: u32,
    ) -> Result<TorchTypeWrite, Error>
    where
        I2C: I2c,
        D: DelayNs,
    {
        if self.torch.written() {
            return Ok(TorchTypeWrite::AlreadyWritten);
        }

        self.torch.mark_written();
        self.torch.set_code(code);
        self.write_page(eeprom, Page::TorchType).await?;
        self.torch_kind = decode_torch_kind(code);
        Ok(TorchTypeWrite::Written)
    }
}

fn decode_torch_kind(code: u32) -> TorchKind {
    use num_traits::FromPrimitive as _;
    TorchKind::from_u32(code).unwrap_or(TorchKind::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mockbus::connected_eeprom;
    use embassy_futures::block_on;

    // One row read costs this many I2C transactions with the mock bridge:
    // reset + skip-ROM + command + two address bytes, then 8 byte reads of
    // three transactions each.
    const TXN_PER_ROW_READ: usize = 5 + 8 * 3;

    #[test]
    fn pages_round_trip_through_the_device() {
        let (mut eeprom, _bus) = connected_eeprom();
        let mut store = ParameterStore::new();
        store.ident.set_marker(IDENT_MARKER);
        store.ident.set_hw_version(0x0102);
        store.ident.set_fw_version(0x0304);
        store.ident.set_serial(0xdead_beef);
        store.weld.set_weld_time_ms(1500);

        block_on(store.write_page(&mut eeprom, Page::Identification)).unwrap();
        block_on(store.write_page(&mut eeprom, Page::WeldTime)).unwrap();

        let mut reloaded = ParameterStore::new();
        block_on(reloaded.init(&mut eeprom)).unwrap();

        assert_eq!(reloaded.ident.marker(), IDENT_MARKER);
        assert_eq!(reloaded.ident.hw_version(), 0x0102);
        assert_eq!(reloaded.ident.fw_version(), 0x0304);
        assert_eq!(reloaded.ident.serial(), 0xdead_beef);
        assert_eq!(reloaded.weld.weld_time_ms(), 1500);
        assert_eq!(reloaded.weld.weld_time_backup_ms(), 1500);
        assert!(reloaded.weld.consistent());
    }

    #[test]
    fn init_seeds_the_default_torch_kind_for_undefined_code() {
        let (mut eeprom, _bus) = connected_eeprom();
        let mut store = ParameterStore::new();

        block_on(store.init(&mut eeprom)).unwrap();

        assert_eq!(store.torch_kind(), DEFAULT_TORCH_KIND);
    }

    #[test]
    fn init_decodes_a_programmed_torch_kind() {
        let (mut eeprom, _bus) = connected_eeprom();
        let mut store = ParameterStore::new();
        block_on(store.write_torch_type(&mut eeprom, TorchKind::WaterCooled as u32)).unwrap();

        let mut reloaded = ParameterStore::new();
        block_on(reloaded.init(&mut eeprom)).unwrap();

        assert_eq!(reloaded.torch_kind(), TorchKind::WaterCooled);
        assert!(reloaded.torch.written());
    }

    #[test]
    fn torch_type_write_is_one_shot() {
        let (mut eeprom, bus) = connected_eeprom();
        let mut store = ParameterStore::new();

        assert_eq!(
            block_on(store.write_torch_type(&mut eeprom, 2)),
            Ok(TorchTypeWrite::Written)
        );

        let before = bus.transactions();
        assert_eq!(
            block_on(store.write_torch_type(&mut eeprom, 3)),
            Ok(TorchTypeWrite::AlreadyWritten)
        );
        // The second write never touches the bus and the code is unchanged.
        assert_eq!(bus.transactions(), before);
        assert_eq!(store.torch.code(), 2);
        assert_eq!(store.torch_kind(), TorchKind::WaterCooled);
    }

    #[test]
    fn partial_page_read_keeps_the_rows_that_arrived() {
        let (mut eeprom, bus) = connected_eeprom();
        let mut writer = ParameterStore::new();
        writer.ident.rows = [[0x11; 8], [0x22; 8], [0x33; 8], [0x44; 8]];
        block_on(writer.write_page(&mut eeprom, Page::Identification)).unwrap();

        let mut store = ParameterStore::new();
        // Let two rows through, then fail in the middle of the third.
        bus.fail_after(2 * TXN_PER_ROW_READ + 3);

        assert_eq!(
            block_on(store.read_page(&mut eeprom, Page::Identification)),
            Err(Error::Transport)
        );
        assert_eq!(store.ident.rows[0], [0x11; 8]);
        assert_eq!(store.ident.rows[1], [0x22; 8]);
        assert_eq!(store.ident.rows[2], [0; 8]);
        assert_eq!(store.ident.rows[3], [0; 8]);
    }

    #[test]
    fn init_aborts_on_the_first_failing_page() {
        let (mut eeprom, bus) = connected_eeprom();
        let mut store = ParameterStore::new();
        bus.fail_after(0);

        assert_eq!(block_on(store.init(&mut eeprom)), Err(Error::Transport));
        assert_eq!(store.torch_kind(), TorchKind::Undefined);
    }
}
