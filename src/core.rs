//! CAN dispatch glue: one context object owning the drivers, the parameter
//! shadow, the self-test sequencer and the transmit slots. Frames route by
//! identifier; replies are staged in the slots and drained by the CAN pump.

use crate::buttons::Buttons;
use crate::config;
use crate::eeprom::{ClearTarget, Eeprom, Error, Page, RomId};
use crate::params::ParameterStore;
use crate::protocol::{self, ResponseStatus, TorchTypeCommand, TxKey, TxSlots};
use crate::selftest::{LedAction, SelfTest};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

pub struct Core<I2C, D> {
    eeprom: Eeprom<I2C, D>,
    pub params: ParameterStore,
    pub selftest: SelfTest,
    tx: TxSlots,
}

impl<I2C, D> Core<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(eeprom: Eeprom<I2C, D>) -> Self {
        Self {
            eeprom,
            params: ParameterStore::new(),
            selftest: SelfTest::new(),
            tx: TxSlots::new(),
        }
    }

    /// Boot path: bring the bridge up, locate the EEPROM, load the parameter
    /// pages. Returns the ROM id for logging.
    pub async fn initialize(&mut self) -> Result<RomId, Error> {
        self.eeprom.initialize().await?;
        let rom_id = self.eeprom.read_rom_id().await?;
        self.params.init(&mut self.eeprom).await?;
        Ok(rom_id)
    }

    pub async fn handle_frame(&mut self, id: u16, data: &[u8]) {
        match id {
            config::CAN_ID_ROM_ID_REQUEST => self.handle_rom_id_request().await,
            config::CAN_ID_TORCH_TYPE_REQUEST => self.handle_torch_type(data).await,
            config::CAN_ID_CLEAR_REQUEST => self.handle_clear(data).await,
            config::CAN_ID_SELFTEST_COMMAND => self.handle_selftest_command(data),
            _ => {}
        }
    }

    /// Runs the EEPROM round-trip the sequencer is waiting on, if any.
    pub async fn run_pending_bkc(&mut self) {
        if !self.selftest.bkc_due() {
            return;
        }
        let pass = self.bkc_round_trip().await.unwrap_or(false);
        self.selftest.complete_bkc(pass, &mut self.tx);
    }

    pub fn tick(&mut self, buttons: Buttons) {
        self.selftest.tick(buttons, &mut self.tx);
    }

    pub fn led_tick(&mut self) -> LedAction {
        self.selftest.led_tick()
    }

    pub fn take_pending_tx(&mut self) -> Option<(u16, [u8; 8])> {
        self.tx.take_pending()
    }

    async fn handle_rom_id_request(&mut self) {
        // A zero id answers for an unreachable device.
        let rom_id = self
            .eeprom
            .read_rom_id()
            .await
            .unwrap_or(RomId::ZERO);
        let frames = protocol::rom_id_frames(rom_id.bytes());
        self.tx.stage(TxKey::RomIdFirst, frames[0]);
        self.tx.stage(TxKey::RomIdSecond, frames[1]);
    }

    async fn handle_torch_type(&mut self, data: &[u8]) {
        use num_traits::FromPrimitive as _;

        let Some((&command, rest)) = data.split_first() else {
            return;
        };

        match TorchTypeCommand::from_u8(command) {
            Some(TorchTypeCommand::Write) => {
                let &[c0, c1, c2, c3, ..] = rest else {
                    self.tx.stage(
                        TxKey::TorchType,
                        protocol::torch_type_reply(command, 0, ResponseStatus::Error),
                    );
                    return;
                };
                let code = u32::from_le_bytes([c0, c1, c2, c3]);
                let status = match self.params.write_torch_type(&mut self.eeprom, code).await {
                    Ok(crate::params::TorchTypeWrite::Written) => ResponseStatus::Ok,
                    Ok(crate::params::TorchTypeWrite::AlreadyWritten) => {
                        ResponseStatus::AlreadyWritten
                    }
                    Err(_) => ResponseStatus::Error,
                };
                self.tx.stage(
                    TxKey::TorchType,
                    protocol::torch_type_reply(command, code, status),
                );
            }
            Some(TorchTypeCommand::Read) => {
                let code = self.params.torch.code();
                self.tx.stage(
                    TxKey::TorchType,
                    protocol::torch_type_reply(command, code, ResponseStatus::Ok),
                );
            }
            None => {
                self.tx.stage(
                    TxKey::TorchType,
                    protocol::torch_type_reply(command, 0, ResponseStatus::Error),
                );
            }
        }
    }

    async fn handle_clear(&mut self, data: &[u8]) {
        let Some(&selector) = data.first() else {
            return;
        };

        let target = match selector {
            protocol::CLEAR_ALL_PAGES => Some(ClearTarget::All),
            selector => Page::from_selector(selector).map(ClearTarget::Page),
        };

        let status = match target {
            Some(target) => match self.eeprom.clear(target).await {
                Ok(()) => ResponseStatus::Ok,
                Err(_) => ResponseStatus::Error,
            },
            None => ResponseStatus::Error,
        };
        self.tx
            .stage(TxKey::Clear, protocol::clear_reply(selector, status));
    }

    fn handle_selftest_command(&mut self, data: &[u8]) {
        if data.starts_with(&protocol::SELFTEST_START) {
            self.selftest.start(&mut self.tx);
        } else if data.starts_with(&protocol::SELFTEST_ACK) {
            self.selftest.peer_ack(&mut self.tx);
        }
    }

    async fn bkc_round_trip(&mut self) -> Result<bool, Error> {
        const PATTERN: [u8; 8] = [0xaa; 8];
        self.eeprom.write_row(config::BKC_TEST_ROW, &PATTERN).await?;
        let row = self.eeprom.read_row(config::BKC_TEST_ROW).await?;
        Ok(row == PATTERN)
    }
}
