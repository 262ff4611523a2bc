//! Test double for the DS2482 bridge with a DS2431-class EEPROM behind it.
//!
//! Decodes the bridge command stream byte-for-byte: one-wire resets arm the
//! ROM-command decoder, scratchpad writes stage into a separate buffer and
//! echo the CRC16, and a copy with a matching authorization code commits to
//! the 128-byte array. Handles are `Clone` so tests keep one to inspect or
//! inject faults while the driver owns the other.

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, Operation};

use crate::bridge::Ds2482;
use crate::config;
use crate::eeprom::Eeprom;

const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MAXIM_DOW);

const MEMORY_SIZE: usize = 128;
const SCRATCHPAD_FULL: u8 = 0x07;

#[derive(Debug)]
pub struct MockError;

impl embedded_hal_async::i2c::Error for MockError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

enum OwState {
    Idle,
    AwaitRomCommand,
    AwaitMemoryCommand,
    WriteScratchpad {
        ta: [u8; 2],
        got_ta: usize,
        data: [u8; 8],
        got_data: usize,
    },
    CopyAuth {
        auth: [u8; 3],
        got: usize,
    },
    ReadMemoryAddress {
        ta: [u8; 2],
        got: usize,
    },
}

enum ReadSource {
    Queue,
    Memory(usize),
}

struct MockState {
    mem: [u8; MEMORY_SIZE],
    rom: [u8; 8],
    scratch: [u8; 8],
    scratch_ta: [u8; 2],
    ow: OwState,
    source: ReadSource,
    queue: heapless::Deque<u8, 32>,
    read_data: u8,
    pointer: u8,
    copy_status: u8,
    tamper_crc: bool,
    tamper_read: Option<(usize, u8)>,
    fail_after: Option<usize>,
    transactions: usize,
}

impl MockState {
    fn new() -> Self {
        Self {
            mem: [0; MEMORY_SIZE],
            rom: [0x2d, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x7a],
            scratch: [0; 8],
            scratch_ta: [0; 2],
            ow: OwState::Idle,
            source: ReadSource::Queue,
            queue: heapless::Deque::new(),
            read_data: 0xff,
            pointer: 0xf0,
            copy_status: 0xaa,
            tamper_crc: false,
            tamper_read: None,
            fail_after: None,
            transactions: 0,
        }
    }

    fn handle_write(&mut self, bytes: &[u8]) {
        match *bytes {
            [0xf0] => {
                // Bridge device reset.
                self.ow = OwState::Idle;
                self.queue.clear();
                self.source = ReadSource::Queue;
            }
            [0xd2, _] => {}
            [0xb4] => {
                // One-wire reset arms the ROM command decoder.
                self.ow = OwState::AwaitRomCommand;
                self.queue.clear();
                self.source = ReadSource::Queue;
            }
            [0xa5, byte] => self.ow_write(byte),
            [0x96] => self.read_data = self.next_read_byte(),
            [0xe1, register] => self.pointer = register,
            _ => {}
        }
    }

    fn handle_read(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = match self.pointer {
                0xe1 => self.read_data,
                _ => 0x00,
            };
        }
    }

    fn ow_write(&mut self, byte: u8) {
        match std::mem::replace(&mut self.ow, OwState::Idle) {
            OwState::Idle => {}
            OwState::AwaitRomCommand => match byte {
                0xcc => self.ow = OwState::AwaitMemoryCommand,
                0x33 => {
                    for b in self.rom {
                        self.queue.push_back(b).expect("queue overflow");
                    }
                    self.ow = OwState::Idle;
                }
                _ => self.ow = OwState::Idle,
            },
            OwState::AwaitMemoryCommand => match byte {
                0x0f => {
                    self.ow = OwState::WriteScratchpad {
                        ta: [0; 2],
                        got_ta: 0,
                        data: [0; 8],
                        got_data: 0,
                    }
                }
                0xaa => {
                    self.queue_scratchpad_readout();
                    self.ow = OwState::Idle;
                }
                0x55 => {
                    self.ow = OwState::CopyAuth {
                        auth: [0; 3],
                        got: 0,
                    }
                }
                0xf0 => {
                    self.ow = OwState::ReadMemoryAddress {
                        ta: [0; 2],
                        got: 0,
                    }
                }
                _ => self.ow = OwState::Idle,
            },
            OwState::WriteScratchpad {
                mut ta,
                mut got_ta,
                mut data,
                mut got_data,
            } => {
                if got_ta < 2 {
                    ta[got_ta] = byte;
                    got_ta += 1;
                } else {
                    data[got_data] = byte;
                    got_data += 1;
                }
                if got_data == 8 {
                    self.scratch = data;
                    self.scratch_ta = ta;

                    let mut digest = CRC16.digest();
                    digest.update(&[0x0f, ta[0], ta[1]]);
                    digest.update(&data);
                    let mut crc = digest.finalize().to_le_bytes();
                    if self.tamper_crc {
                        crc[0] ^= 0xff;
                    }
                    for b in crc {
                        self.queue.push_back(b).expect("queue overflow");
                    }
                    self.ow = OwState::Idle;
                } else {
                    self.ow = OwState::WriteScratchpad {
                        ta,
                        got_ta,
                        data,
                        got_data,
                    };
                }
            }
            OwState::CopyAuth { mut auth, mut got } => {
                auth[got] = byte;
                got += 1;
                if got == 3 {
                    if auth == [self.scratch_ta[0], self.scratch_ta[1], SCRATCHPAD_FULL] {
                        self.commit_scratchpad();
                    }
                    let status = self.copy_status;
                    self.queue.push_back(status).expect("queue overflow");
                    self.ow = OwState::Idle;
                } else {
                    self.ow = OwState::CopyAuth { auth, got };
                }
            }
            OwState::ReadMemoryAddress { mut ta, mut got } => {
                ta[got] = byte;
                got += 1;
                if got == 2 {
                    self.source = ReadSource::Memory(u16::from_le_bytes(ta) as usize);
                    self.ow = OwState::Idle;
                } else {
                    self.ow = OwState::ReadMemoryAddress { ta, got };
                }
            }
        }
    }

    fn queue_scratchpad_readout(&mut self) {
        let [ta1, ta2] = self.scratch_ta;
        let header = [ta1, ta2, SCRATCHPAD_FULL];

        let mut digest = CRC16.digest();
        digest.update(&[0xaa]);
        digest.update(&header);
        digest.update(&self.scratch);
        let crc = digest.finalize().to_le_bytes();

        for b in header {
            self.queue.push_back(b).expect("queue overflow");
        }
        for b in self.scratch {
            self.queue.push_back(b).expect("queue overflow");
        }
        for b in crc {
            self.queue.push_back(b).expect("queue overflow");
        }
    }

    fn commit_scratchpad(&mut self) {
        let address = u16::from_le_bytes(self.scratch_ta) as usize;
        if address + 8 <= MEMORY_SIZE {
            self.mem[address..address + 8].copy_from_slice(&self.scratch);
        }
    }

    fn next_read_byte(&mut self) -> u8 {
        match self.source {
            ReadSource::Queue => self.queue.pop_front().unwrap_or(0xff),
            ReadSource::Memory(cursor) => {
                let mut value = self.mem.get(cursor).copied().unwrap_or(0xff);
                if let Some((address, xor)) = self.tamper_read {
                    if address == cursor {
                        value ^= xor;
                    }
                }
                self.source = ReadSource::Memory(cursor + 1);
                value
            }
        }
    }
}

#[derive(Clone)]
pub struct MockBus {
    state: Rc<RefCell<MockState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::new())),
        }
    }

    pub fn set_rom(&self, rom: [u8; 8]) {
        self.state.borrow_mut().rom = rom;
    }

    pub fn set_copy_status(&self, status: u8) {
        self.state.borrow_mut().copy_status = status;
    }

    pub fn tamper_crc(&self) {
        self.state.borrow_mut().tamper_crc = true;
    }

    /// XORs the byte at `address` into every read-memory stream that crosses
    /// it, without touching the stored value.
    pub fn tamper_read(&self, address: usize, xor: u8) {
        self.state.borrow_mut().tamper_read = Some((address, xor));
    }

    pub fn memory_at(&self, address: usize) -> [u8; 8] {
        let state = self.state.borrow();
        let mut row = [0u8; 8];
        row.copy_from_slice(&state.mem[address..address + 8]);
        row
    }

    pub fn transactions(&self) -> usize {
        self.state.borrow().transactions
    }

    /// Makes every I2C transaction after the next `n` fail.
    pub fn fail_after(&self, n: usize) {
        let mut state = self.state.borrow_mut();
        let done = state.transactions;
        state.fail_after = Some(done + n);
    }

    pub fn fail_after_never(&self) {
        self.state.borrow_mut().fail_after = None;
    }
}

impl ErrorType for MockBus {
    type Error = MockError;
}

impl I2c for MockBus {
    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if let Some(limit) = state.fail_after {
            if state.transactions >= limit {
                return Err(MockError);
            }
        }
        state.transactions += 1;

        for operation in operations {
            match operation {
                Operation::Write(bytes) => state.handle_write(bytes),
                Operation::Read(buf) => state.handle_read(buf),
            }
        }
        Ok(())
    }
}

/// Delay source that completes immediately; the drivers' settle windows cost
/// nothing in tests.
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

pub fn mock_eeprom(bus: MockBus) -> (Eeprom<MockBus, NoopDelay>, MockBus) {
    let handle = bus.clone();
    let bridge = Ds2482::new(bus, NoopDelay, config::BRIDGE_I2C_ADDRESS);
    (Eeprom::new(bridge), handle)
}

/// An eeprom whose connect latch is already on, as after the boot-time ROM
/// id read.
pub fn connected_eeprom() -> (Eeprom<MockBus, NoopDelay>, MockBus) {
    let (mut eeprom, handle) = mock_eeprom(MockBus::new());
    embassy_futures::block_on(eeprom.read_rom_id()).expect("mock rom id");
    (eeprom, handle)
}
