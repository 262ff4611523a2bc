#[cfg(target_os = "none")]
use embassy_stm32::gpio;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct Buttons(u8);

bitflags::bitflags! {
    impl Buttons: u8 {
        const UP = 0b00000001;
        const DOWN = 0b00000010;
        const LEFT = 0b00000100;
        const RIGHT = 0b00001000;
        const TRIGGER = 0b00010000;
    }
}

/// The five board inputs, internal pull-up with the switch pulling to ground.
#[cfg(target_os = "none")]
pub struct ButtonBank {
    up: gpio::Input<'static>,
    down: gpio::Input<'static>,
    left: gpio::Input<'static>,
    right: gpio::Input<'static>,
    trigger: gpio::Input<'static>,
}

#[cfg(target_os = "none")]
impl ButtonBank {
    pub fn new(
        up: gpio::Input<'static>,
        down: gpio::Input<'static>,
        left: gpio::Input<'static>,
        right: gpio::Input<'static>,
        trigger: gpio::Input<'static>,
    ) -> Self {
        Self {
            up,
            down,
            left,
            right,
            trigger,
        }
    }

    pub fn sample(&self) -> Buttons {
        let mut pressed = Buttons::empty();
        if self.up.is_low() {
            pressed |= Buttons::UP;
        }
        if self.down.is_low() {
            pressed |= Buttons::DOWN;
        }
        if self.left.is_low() {
            pressed |= Buttons::LEFT;
        }
        if self.right.is_low() {
            pressed |= Buttons::RIGHT;
        }
        if self.trigger.is_low() {
            pressed |= Buttons::TRIGGER;
        }
        pressed
    }
}
