//! Production-line self-test sequencer.
//!
//! Pure state machine: stage timeouts are tick counters decremented by the
//! 10 ms sequencer tick, button input arrives as a sampled bitmask, and the
//! EEPROM round-trip outcome is fed back by the dispatch glue. Every stage
//! transition stages a status broadcast in the transmit slots. The stage only
//! moves forward; `TestOver` is terminal until an external restart.

use crate::buttons::Buttons;
use crate::config;
use crate::protocol::{self, TxKey, TxSlots};

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TestResult {
    Unknown = 0,
    Pass = 1,
    Fail = 2,
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TestState {
    NotDone = 0,
    InProgress = 1,
    Completed = 2,
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TestStage {
    NoState = 0,
    CanTest = 1,
    BkcTest = 2,
    UpKeyTest = 3,
    DownKeyTest = 4,
    LeftKeyTest = 5,
    RightKeyTest = 6,
    TriggerKeyTest = 7,
    TestOver = 8,
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TestMode {
    Idle = 0,
    Running = 1,
}

/// Sub-test index, also the broadcast byte order and the 2-bit field order
/// of [`SelfTest::results_word`].
#[repr(usize)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum SubTest {
    Can = 0,
    Bkc = 1,
    Up = 2,
    Down = 3,
    Left = 4,
    Right = 5,
    Trigger = 6,
}

pub const SUB_TEST_COUNT: usize = 7;

const KEY_TESTS: [(SubTest, Buttons, TestStage); 5] = [
    (SubTest::Up, Buttons::UP, TestStage::UpKeyTest),
    (SubTest::Down, Buttons::DOWN, TestStage::DownKeyTest),
    (SubTest::Left, Buttons::LEFT, TestStage::LeftKeyTest),
    (SubTest::Right, Buttons::RIGHT, TestStage::RightKeyTest),
    (SubTest::Trigger, Buttons::TRIGGER, TestStage::TriggerKeyTest),
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum LedPhase {
    /// Steady on while a test sequence is running.
    Init,
    /// Blinking out the last stage outcome.
    OnOff,
    Off,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum LedAction {
    On,
    Off,
}

/// Feedback sub-machine for the test LED, advanced by the independent LED
/// ticker. A pass blinks [`config::PASS_BLINKS`] times, a fail
/// [`config::FAIL_BLINKS`].
struct LedFeedback {
    phase: LedPhase,
    toggles_left: u8,
    lit: bool,
}

impl LedFeedback {
    const fn new() -> Self {
        Self {
            phase: LedPhase::Off,
            toggles_left: 0,
            lit: false,
        }
    }

    fn sequence_started(&mut self) {
        self.phase = LedPhase::Init;
        self.toggles_left = 0;
    }

    fn stage_outcome(&mut self, pass: bool) {
        let blinks = if pass {
            config::PASS_BLINKS
        } else {
            config::FAIL_BLINKS
        };
        self.phase = LedPhase::OnOff;
        self.toggles_left = blinks * 2;
        self.lit = false;
    }

    fn tick(&mut self, running: bool) -> LedAction {
        match self.phase {
            LedPhase::Off => LedAction::Off,
            LedPhase::Init => LedAction::On,
            LedPhase::OnOff => {
                self.lit = !self.lit;
                self.toggles_left -= 1;
                if self.toggles_left == 0 {
                    self.phase = if running { LedPhase::Init } else { LedPhase::Off };
                }
                if self.lit {
                    LedAction::On
                } else {
                    LedAction::Off
                }
            }
        }
    }
}

pub struct SelfTest {
    stage: TestStage,
    mode: TestMode,
    results: [TestResult; SUB_TEST_COUNT],
    states: [TestState; SUB_TEST_COUNT],
    timeout_ticks: u32,
    led: LedFeedback,
}

impl SelfTest {
    pub const fn new() -> Self {
        Self {
            stage: TestStage::NoState,
            mode: TestMode::Idle,
            results: [TestResult::Unknown; SUB_TEST_COUNT],
            states: [TestState::NotDone; SUB_TEST_COUNT],
            timeout_ticks: 0,
            led: LedFeedback::new(),
        }
    }

    pub fn stage(&self) -> TestStage {
        self.stage
    }

    pub fn mode(&self) -> TestMode {
        self.mode
    }

    pub fn result(&self, sub: SubTest) -> TestResult {
        self.results[sub as usize]
    }

    pub fn state(&self, sub: SubTest) -> TestState {
        self.states[sub as usize]
    }

    /// Starts (or externally restarts) the sequence. Ignored while a
    /// sequence is underway.
    pub fn start(&mut self, tx: &mut TxSlots) {
        if self.mode == TestMode::Running
            || !matches!(self.stage, TestStage::NoState | TestStage::TestOver)
        {
            return;
        }

        self.results = [TestResult::Unknown; SUB_TEST_COUNT];
        self.states = [TestState::NotDone; SUB_TEST_COUNT];
        self.mode = TestMode::Running;
        self.stage = TestStage::CanTest;
        self.states[SubTest::Can as usize] = TestState::InProgress;
        self.timeout_ticks = config::CAN_TEST_TIMEOUT_TICKS;
        self.led.sequence_started();

        tx.stage(TxKey::TestPing, protocol::selftest_ping_payload());
        self.broadcast(tx);
    }

    /// A peer echoed the acknowledgement payload.
    pub fn peer_ack(&mut self, tx: &mut TxSlots) {
        if self.stage == TestStage::CanTest {
            self.finish(SubTest::Can, TestResult::Pass, tx);
            self.enter_bkc();
        }
    }

    /// True while the dispatch glue owes the sequencer an EEPROM round-trip.
    pub fn bkc_due(&self) -> bool {
        self.stage == TestStage::BkcTest
            && self.states[SubTest::Bkc as usize] == TestState::InProgress
    }

    pub fn complete_bkc(&mut self, pass: bool, tx: &mut TxSlots) {
        if !self.bkc_due() {
            return;
        }
        let result = if pass { TestResult::Pass } else { TestResult::Fail };
        self.finish(SubTest::Bkc, result, tx);
        self.enter_keys();
    }

    /// One sequencer tick: counts the active stage timeout down and latches
    /// pressed keys during the combined key phase.
    pub fn tick(&mut self, buttons: Buttons, tx: &mut TxSlots) {
        match self.stage {
            TestStage::NoState | TestStage::TestOver => {}
            TestStage::CanTest => {
                if self.timed_out() {
                    self.finish(SubTest::Can, TestResult::Fail, tx);
                    self.enter_bkc();
                }
            }
            TestStage::BkcTest => {
                if self.timed_out() {
                    self.finish(SubTest::Bkc, TestResult::Fail, tx);
                    self.enter_keys();
                }
            }
            _ => self.tick_keys(buttons, tx),
        }
    }

    fn tick_keys(&mut self, buttons: Buttons, tx: &mut TxSlots) {
        for (sub, mask, _) in KEY_TESTS {
            if self.states[sub as usize] != TestState::Completed && buttons.contains(mask) {
                self.finish(sub, TestResult::Pass, tx);
            }
        }
        self.advance_key_stage();

        if self.stage != TestStage::TestOver && self.timed_out() {
            for (sub, _, _) in KEY_TESTS {
                if self.states[sub as usize] != TestState::Completed {
                    self.results[sub as usize] = TestResult::Fail;
                    self.states[sub as usize] = TestState::Completed;
                }
            }
            self.led.stage_outcome(false);
            self.stage = TestStage::TestOver;
            self.mode = TestMode::Idle;
            self.broadcast(tx);
        }
    }

    /// Packs the seven 2-bit result codes into one word, CAN in the lowest
    /// bits through Trigger in the highest.
    pub fn results_word(&self) -> u32 {
        self.results
            .iter()
            .enumerate()
            .fold(0, |word, (index, &result)| {
                word | (result as u32) << (2 * index)
            })
    }

    /// Advances the LED feedback sub-machine by one LED tick.
    pub fn led_tick(&mut self) -> LedAction {
        let running = !matches!(self.stage, TestStage::NoState | TestStage::TestOver);
        self.led.tick(running)
    }

    fn timed_out(&mut self) -> bool {
        self.timeout_ticks = self.timeout_ticks.saturating_sub(1);
        self.timeout_ticks == 0
    }

    fn enter_bkc(&mut self) {
        self.stage = TestStage::BkcTest;
        self.states[SubTest::Bkc as usize] = TestState::InProgress;
        self.timeout_ticks = config::BKC_TEST_TIMEOUT_TICKS;
    }

    fn enter_keys(&mut self) {
        for (sub, _, _) in KEY_TESTS {
            self.states[sub as usize] = TestState::InProgress;
        }
        self.stage = TestStage::UpKeyTest;
        // One shared timeout for the whole key phase.
        self.timeout_ticks = config::KEY_TEST_TIMEOUT_TICKS;
    }

    /// Moves the stage pointer to the first key not yet completed, or to
    /// TestOver when every key has latched. Forward only.
    fn advance_key_stage(&mut self) {
        for (sub, _, stage) in KEY_TESTS {
            if self.states[sub as usize] != TestState::Completed {
                if stage > self.stage {
                    self.stage = stage;
                }
                return;
            }
        }
        self.stage = TestStage::TestOver;
        self.mode = TestMode::Idle;
    }

    fn finish(&mut self, sub: SubTest, result: TestResult, tx: &mut TxSlots) {
        self.results[sub as usize] = result;
        self.states[sub as usize] = TestState::Completed;
        self.led.stage_outcome(result == TestResult::Pass);
        self.broadcast(tx);
    }

    /// One result byte per sub-test, in SubTest order.
    fn broadcast(&self, tx: &mut TxSlots) {
        let mut payload = [0u8; 8];
        for (index, &result) in self.results.iter().enumerate() {
            payload[index] = result as u8;
        }
        tx.stage(TxKey::TestStatus, payload);
    }
}
