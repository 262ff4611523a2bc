#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

// The drivers, the parameter model and the sequencer are hardware-free and
// build on the host for the test suite; everything embassy-stm32 is gated to
// the firmware target.

mod bridge;
mod buttons;
mod config;
mod core;
mod eeprom;
#[cfg(target_os = "none")]
mod leds;
#[cfg(test)]
mod mockbus;
mod params;
mod protocol;
mod selftest;
#[cfg(target_os = "none")]
mod status;

#[cfg(target_os = "none")]
use embassy_stm32::{can, gpio, i2c, mode, pac, peripherals};
#[cfg(target_os = "none")]
use embassy_sync::mutex;
// For link-time dependencies:
#[cfg(target_os = "none")]
use {defmt_rtt as _, panic_probe as _};

#[cfg(target_os = "none")]
embassy_stm32::bind_interrupts!(struct Irqs {
    USB_LP_CAN1_RX0 => can::Rx0InterruptHandler<peripherals::CAN>;
    CAN1_RX1 => can::Rx1InterruptHandler<peripherals::CAN>;
    CAN1_SCE => can::SceInterruptHandler<peripherals::CAN>;
    USB_HP_CAN1_TX => can::TxInterruptHandler<peripherals::CAN>;
    I2C1_EV => i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

#[cfg(target_os = "none")]
type BoardCore = core::Core<i2c::I2c<'static, mode::Async>, embassy_time::Delay>;

#[cfg(target_os = "none")]
#[embassy_executor::main]
async fn main(spawner: embassy_executor::Spawner) {
    // Store these as static so that they get `'static` lifetime and survive when `main()` exits
    static G_LED: static_cell::StaticCell<leds::Led> = static_cell::StaticCell::new();
    static Y_LED: static_cell::StaticCell<leds::Led> = static_cell::StaticCell::new();
    static CORE: static_cell::StaticCell<BoardCore> = static_cell::StaticCell::new();

    // No special requirements, e.g. no external crystal
    let p = embassy_stm32::init(embassy_stm32::Config::default());

    // Set canbus alternate pin mapping to B8/B9
    pac::AFIO.mapr().modify(|w| w.set_can1_remap(2));

    let g_led = G_LED.init(mutex::Mutex::new(gpio::Output::new(
        p.PB12,
        gpio::Level::Low,
        gpio::Speed::Low,
    )));
    let y_led = Y_LED.init(mutex::Mutex::new(gpio::Output::new(
        p.PA12,
        gpio::Level::Low,
        gpio::Speed::Low,
    )));
    let leds = leds::Leds::new(g_led, y_led);

    let mut can = can::Can::new(p.CAN, p.PB8, p.PB9, Irqs);
    can.modify_config()
        .set_loopback(false)
        .set_silent(false)
        .set_bitrate(config::CAN_BITRATE);
    can.enable().await;
    configure_recv_filters(&mut can);

    let i2c = i2c::I2c::new(
        p.I2C1,
        p.PB6,
        p.PB7,
        Irqs,
        p.DMA1_CH6,
        p.DMA1_CH7,
        config::I2C_BITRATE,
        Default::default(),
    );
    let bridge = bridge::Ds2482::new(i2c, embassy_time::Delay, config::BRIDGE_I2C_ADDRESS);
    let board_core = CORE.init(core::Core::new(eeprom::Eeprom::new(bridge)));

    match board_core.initialize().await {
        Ok(rom_id) => defmt::info!("eeprom up, rom id {=u64:#x}", rom_id.raw()),
        Err(_) => {
            // Keep running; reads may still work and the self-test will
            // report the storage path as failed.
            defmt::error!("eeprom unreachable at boot");
            leds.show_error_code(spawner, status::ErrorKind::Eeprom as u32);
        }
    }

    let button_bank = buttons::ButtonBank::new(
        gpio::Input::new(p.PA0, gpio::Pull::Up),
        gpio::Input::new(p.PA1, gpio::Pull::Up),
        gpio::Input::new(p.PA2, gpio::Pull::Up),
        gpio::Input::new(p.PA3, gpio::Pull::Up),
        gpio::Input::new(p.PA4, gpio::Pull::Up),
    );
    let test_led = gpio::Output::new(p.PB0, gpio::Level::Low, gpio::Speed::Low);

    let signaller = status::LedsSignaller::new(leds, spawner);

    defmt::unwrap!(spawner.spawn(run_core(board_core, can, button_bank, test_led, signaller)));
    defmt::unwrap!(spawner.spawn(watchdog_blink(leds)));

    // OK, all tasks started, now we go to sleep. Purely interrupt driven from here.
}

/// The owning task: all bus traffic, sequencer ticks and LED feedback pass
/// through here, so a durable EEPROM write is never interleaved with other
/// bus traffic.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn run_core(
    board_core: &'static mut BoardCore,
    mut can: can::Can<'static>,
    button_bank: buttons::ButtonBank,
    mut test_led: gpio::Output<'static>,
    signaller: status::LedsSignaller,
) {
    use embassy_futures::select;
    use status::Signaller as _;

    let mut seq_ticker = embassy_time::Ticker::every(config::SEQUENCER_TICK);
    let mut led_ticker = embassy_time::Ticker::every(config::LED_TICK);

    loop {
        match select::select3(can.read(), seq_ticker.next(), led_ticker.next()).await {
            select::Either3::First(Ok(can::frame::Envelope { ts, frame })) => {
                let can::Id::Standard(id) = *frame.id() else {
                    continue;
                };
                defmt::debug!("processing frame with id={} ts={}", id.as_raw(), ts);
                board_core.handle_frame(id.as_raw(), frame.data()).await;
            }
            select::Either3::First(Err(err)) => {
                defmt::error!("canbus error: {}", err);
                signaller.signal_error(status::ErrorKind::Can).await;
            }
            select::Either3::Second(()) => {
                board_core.tick(button_bank.sample());
                board_core.run_pending_bkc().await;
            }
            select::Either3::Third(()) => match board_core.led_tick() {
                selftest::LedAction::On => test_led.set_level(gpio::Level::High),
                selftest::LedAction::Off => test_led.set_level(gpio::Level::Low),
            },
        }

        while let Some((id, data)) = board_core.take_pending_tx() {
            let id = defmt::unwrap!(can::StandardId::new(id));
            let frame = defmt::unwrap!(can::frame::Frame::new_data(id, &data));
            can.write(&frame).await;
        }
    }
}

#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn watchdog_blink(leds: leds::Leds<'static>) {
    loop {
        leds.blink_watchdog().await;
        embassy_time::Timer::after(config::WATCHDOG_LED_BLINK_INTERVAL).await;
    }
}

#[cfg(target_os = "none")]
fn configure_recv_filters(can: &mut can::Can<'static>) {
    let id = defmt::unwrap!(can::StandardId::new(config::CAN_FILTER_ID));
    let mask = defmt::unwrap!(can::StandardId::new(config::CAN_FILTER_MASK));
    can.modify_filters().enable_bank(
        0,
        can::Fifo::Fifo0,
        can::filter::Mask32::frames_with_std_id(id, mask),
    );
}

#[cfg(not(target_os = "none"))]
fn main() {}
