#[cfg(target_os = "none")]
use embassy_stm32::time;

pub const CAN_BITRATE: u32 = 500_000;

// The accessory board answers on a fixed block of standard identifiers so the
// production tester can address it with a single mask filter.
pub const CAN_ID_ROM_ID_REQUEST: u16 = 0x621;
pub const CAN_ID_ROM_ID_RESPONSE: u16 = 0x622;
pub const CAN_ID_TORCH_TYPE_REQUEST: u16 = 0x623;
pub const CAN_ID_TORCH_TYPE_RESPONSE: u16 = 0x624;
pub const CAN_ID_CLEAR_REQUEST: u16 = 0x625;
pub const CAN_ID_CLEAR_RESPONSE: u16 = 0x626;
pub const CAN_ID_SELFTEST_COMMAND: u16 = 0x627;
pub const CAN_ID_SELFTEST_STATUS: u16 = 0x628;
pub const CAN_ID_SELFTEST_PING: u16 = 0x629;

/// Receive filter covering the whole request block above.
pub const CAN_FILTER_ID: u16 = 0x620;
pub const CAN_FILTER_MASK: u16 = 0x7f0;

/// Sender/receiver pair carried in bytes 6-7 of the ROM id response frames.
pub const NODE_ID: u8 = 0x54;
pub const TESTER_ID: u8 = 0x50;

/// Fixed I2C address of the DS2482-100 one-wire bridge.
pub const BRIDGE_I2C_ADDRESS: u8 = 0x18;

// The bridge has no interrupt line on this board; every command gets a fixed
// settle delay instead of busy-polling the status register.
pub const BRIDGE_RESET_SETTLE_US: u32 = 1_000;
pub const ONEWIRE_RESET_SETTLE_US: u32 = 1_250;
pub const ONEWIRE_BYTE_SETTLE_US: u32 = 600;
pub const REGISTER_SETTLE_US: u32 = 100;

/// EEPROM programming time after a copy-scratchpad command (t_PROG).
pub const COPY_PROGRAM_WAIT_MS: u32 = 13;

/// Settle time between the verify pattern write and the read-back pass.
pub const VERIFY_SETTLE_MS: u32 = 10;

/// Row exercised by the production BKC round-trip test.
pub const BKC_TEST_ROW: u8 = 1;

// Self-test stage timeouts, counted in sequencer ticks of SEQUENCER_TICK.
pub const CAN_TEST_TIMEOUT_TICKS: u32 = 500;
pub const BKC_TEST_TIMEOUT_TICKS: u32 = 200;
/// One shared timeout for the whole combined key phase.
pub const KEY_TEST_TIMEOUT_TICKS: u32 = 3_000;

/// Blink counts for the test LED after a stage completes.
pub const PASS_BLINKS: u8 = 2;
pub const FAIL_BLINKS: u8 = 5;

#[cfg(target_os = "none")]
pub const SEQUENCER_TICK: embassy_time::Duration = embassy_time::Duration::from_millis(10);
#[cfg(target_os = "none")]
pub const LED_TICK: embassy_time::Duration = embassy_time::Duration::from_millis(100);

#[cfg(target_os = "none")]
pub const I2C_BITRATE: time::Hertz = time::hz(100_000);
#[cfg(target_os = "none")]
pub const WATCHDOG_LED_BLINK_INTERVAL: embassy_time::Duration =
    embassy_time::Duration::from_secs(5);
#[cfg(target_os = "none")]
pub const WATCHDOG_LED_ON_DURATION: embassy_time::Duration =
    embassy_time::Duration::from_millis(100);

/// Delay between error blinks during error conditions
#[cfg(target_os = "none")]
pub const ERROR_DELAY_BETWEEN_BLINKS: embassy_time::Duration =
    embassy_time::Duration::from_millis(300);
/// Delay between each group of blinks during error conditions
#[cfg(target_os = "none")]
pub const ERROR_DELAY_BETWEEN_BLINK_GROUPS: embassy_time::Duration =
    embassy_time::Duration::from_millis(700);
/// Number of times we will blink out the same error code before moving on.
#[cfg(target_os = "none")]
pub const ERROR_NUM_BLINK_GROUPS: u32 = 3;
