use crate::config;

/// Byte sequence from the production tester that starts the self-test.
pub const SELFTEST_START: [u8; 4] = *b"TC22";
/// ASCII acknowledgement a peer must echo to satisfy the CAN-test stage.
pub const SELFTEST_ACK: [u8; 3] = *b"ACK";

/// Clear-request page selector meaning "all pages".
pub const CLEAR_ALL_PAGES: u8 = 0xff;

#[repr(u8)]
#[derive(num_derive::FromPrimitive, Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TorchTypeCommand {
    // Skip 0 to avoid issues with sender mistakenly sending a zeroed buffer
    Write = 1,
    Read = 2,
}

#[repr(u8)]
#[derive(num_derive::FromPrimitive, Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum ResponseStatus {
    Ok = 0,
    Error = 1,
    /// Torch type writes are one-shot; a second write reports this instead.
    AlreadyWritten = 2,
}

/// Transmit slots, one per destination the board ever answers to. Staging a
/// reply overwrites the slot payload and raises its pending flag; the CAN
/// pump drains pending slots in key order. Nothing ever waits on a flag.
#[repr(usize)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TxKey {
    RomIdFirst = 0,
    RomIdSecond = 1,
    TorchType = 2,
    Clear = 3,
    TestStatus = 4,
    TestPing = 5,
}

pub const TX_SLOT_COUNT: usize = 6;

const TX_KEYS: [TxKey; TX_SLOT_COUNT] = [
    TxKey::RomIdFirst,
    TxKey::RomIdSecond,
    TxKey::TorchType,
    TxKey::Clear,
    TxKey::TestStatus,
    TxKey::TestPing,
];

impl TxKey {
    pub const fn can_id(self) -> u16 {
        match self {
            TxKey::RomIdFirst | TxKey::RomIdSecond => config::CAN_ID_ROM_ID_RESPONSE,
            TxKey::TorchType => config::CAN_ID_TORCH_TYPE_RESPONSE,
            TxKey::Clear => config::CAN_ID_CLEAR_RESPONSE,
            TxKey::TestStatus => config::CAN_ID_SELFTEST_STATUS,
            TxKey::TestPing => config::CAN_ID_SELFTEST_PING,
        }
    }
}

pub struct TxSlots {
    payloads: [[u8; 8]; TX_SLOT_COUNT],
    pending: [bool; TX_SLOT_COUNT],
}

impl TxSlots {
    pub const fn new() -> Self {
        Self {
            payloads: [[0; 8]; TX_SLOT_COUNT],
            pending: [false; TX_SLOT_COUNT],
        }
    }

    pub fn stage(&mut self, key: TxKey, payload: [u8; 8]) {
        self.payloads[key as usize] = payload;
        self.pending[key as usize] = true;
    }

    pub fn is_pending(&self, key: TxKey) -> bool {
        self.pending[key as usize]
    }

    /// Pops the next pending payload in key order, clearing its flag.
    pub fn take_pending(&mut self) -> Option<(u16, [u8; 8])> {
        for key in TX_KEYS {
            if self.pending[key as usize] {
                self.pending[key as usize] = false;
                return Some((key.can_id(), self.payloads[key as usize]));
            }
        }
        None
    }
}

/// ROM id response, split across two frames: four id bytes, a sequence byte,
/// a pad, then the fixed sender/receiver pair.
pub fn rom_id_frames(id: [u8; 8]) -> [[u8; 8]; 2] {
    [
        [
            id[0],
            id[1],
            id[2],
            id[3],
            1,
            0,
            config::NODE_ID,
            config::TESTER_ID,
        ],
        [
            id[4],
            id[5],
            id[6],
            id[7],
            2,
            0,
            config::NODE_ID,
            config::TESTER_ID,
        ],
    ]
}

pub fn torch_type_reply(command: u8, code: u32, status: ResponseStatus) -> [u8; 8] {
    let [c0, c1, c2, c3] = code.to_le_bytes();
    [command, c0, c1, c2, c3, status as u8, 0, 0]
}

pub fn clear_reply(selector: u8, status: ResponseStatus) -> [u8; 8] {
    [selector, status as u8, 0, 0, 0, 0, 0, 0]
}

/// Challenge the board broadcasts while waiting for the tester's ACK.
pub fn selftest_ping_payload() -> [u8; 8] {
    let [s0, s1, s2, s3] = SELFTEST_START;
    [s0, s1, s2, s3, 0, 0, 0, 0]
}
