/*
 *  buttons.rs
 *
 *  MyImpression - e-ink picture frame
 *  (c) 2020-26 Stuart Hunter
 *
 *  Front panel buttons, debounce and the status LED
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// BCM pin of the status LED.
pub const LED_PIN: u8 = 13;

const PRESS_FLASH: Duration = Duration::from_millis(300);
const BLINK_ON: Duration = Duration::from_millis(200);
const BLINK_OFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ButtonId {
    A,
    B,
    C,
    D,
}

impl ButtonId {
    pub const ALL: [ButtonId; 4] = [ButtonId::A, ButtonId::B, ButtonId::C, ButtonId::D];

    /// BCM pin on the Pi header.
    pub fn pin(&self) -> u8 {
        match self {
            ButtonId::A => 5,
            ButtonId::B => 6,
            ButtonId::C => 16,
            ButtonId::D => 24,
        }
    }

    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'a' => Some(ButtonId::A),
            'b' => Some(ButtonId::B),
            'c' => Some(ButtonId::C),
            'd' => Some(ButtonId::D),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: ButtonId,
    pub at: Instant,
}

impl ButtonEvent {
    pub fn now(button: ButtonId) -> Self {
        Self { button, at: Instant::now() }
    }
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("button source already subscribed")]
    AlreadySubscribed,
}

#[cfg(feature = "gpio")]
impl From<rppal::gpio::Error> for HardwareError {
    fn from(e: rppal::gpio::Error) -> Self {
        HardwareError::Gpio(e.to_string())
    }
}

/// Drops presses that arrive within `interval` of the last accepted press of the same button.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    last_accepted: HashMap<ButtonId, Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_accepted: HashMap::new() }
    }

    pub fn accept(&mut self, event: &ButtonEvent) -> bool {
        if let Some(last) = self.last_accepted.get(&event.button) {
            if event.at.saturating_duration_since(*last) < self.interval {
                debug!("debounced {:?}", event.button);
                return false;
            }
        }
        self.last_accepted.insert(event.button, event.at);
        true
    }
}

/// Something that delivers button presses. The controller never polls pins itself.
pub trait ButtonSource: Send {
    fn name(&self) -> &str;
    fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ButtonEvent>, HardwareError>;
}

/// Keys `a`..`d` followed by enter on stdin stand in for the buttons.
#[derive(Default)]
pub struct KeyboardButtons {
    reader: Option<JoinHandle<()>>,
}

impl KeyboardButtons {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ButtonSource for KeyboardButtons {
    fn name(&self) -> &str {
        "keyboard"
    }

    fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ButtonEvent>, HardwareError> {
        if self.reader.is_some() {
            return Err(HardwareError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        for button in line.trim().chars().filter_map(ButtonId::from_key) {
                            if tx.send(ButtonEvent::now(button)).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin unreadable, keyboard buttons disabled: {}", e);
                        break;
                    }
                }
            }
        }));
        info!("Buttons: press a, b, c or d then enter");
        Ok(rx)
    }
}

impl Drop for KeyboardButtons {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Presses injected through a channel; used by tests and scripted runs.
pub struct ChannelButtons {
    rx: Option<mpsc::UnboundedReceiver<ButtonEvent>>,
}

impl ChannelButtons {
    pub fn new() -> (Self, mpsc::UnboundedSender<ButtonEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx: Some(rx) }, tx)
    }
}

impl ButtonSource for ChannelButtons {
    fn name(&self) -> &str {
        "channel"
    }

    fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ButtonEvent>, HardwareError> {
        self.rx.take().ok_or(HardwareError::AlreadySubscribed)
    }
}

/// Falling edge interrupts on the button pins, pulled up.
#[cfg(feature = "gpio")]
pub struct GpioButtons {
    pins: Vec<rppal::gpio::InputPin>,
}

#[cfg(feature = "gpio")]
impl GpioButtons {
    pub fn new() -> Result<Self, HardwareError> {
        let gpio = rppal::gpio::Gpio::new()?;
        let pins = ButtonId::ALL
            .iter()
            .map(|b| gpio.get(b.pin()).map(|p| p.into_input_pullup()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pins })
    }
}

#[cfg(feature = "gpio")]
impl ButtonSource for GpioButtons {
    fn name(&self) -> &str {
        "gpio"
    }

    fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ButtonEvent>, HardwareError> {
        let (tx, rx) = mpsc::unbounded_channel();
        for (pin, button) in self.pins.iter_mut().zip(ButtonId::ALL) {
            let tx = tx.clone();
            pin.set_async_interrupt(rppal::gpio::Trigger::FallingEdge, move |_level| {
                let _ = tx.send(ButtonEvent::now(button));
            })?;
            info!("Button {:?} on GPIO {}", button, button.pin());
        }
        Ok(rx)
    }
}

pub trait StatusLed: Send {
    fn set(&mut self, on: bool);
}

/// No LED wired: transitions go to the debug log.
pub struct LogLed;

impl StatusLed for LogLed {
    fn set(&mut self, on: bool) {
        debug!("LED {}", if on { "on" } else { "off" });
    }
}

#[cfg(feature = "gpio")]
pub struct GpioLed {
    pin: rppal::gpio::OutputPin,
}

#[cfg(feature = "gpio")]
impl GpioLed {
    pub fn new() -> Result<Self, HardwareError> {
        let mut pin = rppal::gpio::Gpio::new()?.get(LED_PIN)?.into_output();
        pin.set_low();
        Ok(Self { pin })
    }
}

#[cfg(feature = "gpio")]
impl StatusLed for GpioLed {
    fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

/// The frame's buttons: GPIO pins with the `gpio` feature, stdin otherwise.
/// A GPIO failure is returned, never swapped for the keyboard.
#[cfg(feature = "gpio")]
pub fn open_buttons() -> Result<Box<dyn ButtonSource>, HardwareError> {
    Ok(Box::new(GpioButtons::new()?))
}

#[cfg(not(feature = "gpio"))]
pub fn open_buttons() -> Result<Box<dyn ButtonSource>, HardwareError> {
    Ok(Box::new(KeyboardButtons::new()))
}

#[cfg(feature = "gpio")]
pub fn open_led() -> Result<Box<dyn StatusLed>, HardwareError> {
    Ok(Box::new(GpioLed::new()?))
}

#[cfg(not(feature = "gpio"))]
pub fn open_led() -> Result<Box<dyn StatusLed>, HardwareError> {
    Ok(Box::new(LogLed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedSignal {
    /// short flash acknowledging a press
    Press,
    /// `n` blinks identifying the new mode
    Mode(u8),
}

/// Plays LED patterns in the background so the control loop never waits on them.
pub fn spawn_led_task(mut led: Box<dyn StatusLed>) -> (mpsc::UnboundedSender<LedSignal>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<LedSignal>();
    let handle = tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            match signal {
                LedSignal::Press => {
                    led.set(true);
                    tokio::time::sleep(PRESS_FLASH).await;
                    led.set(false);
                }
                LedSignal::Mode(count) => {
                    for _ in 0..count {
                        led.set(true);
                        tokio::time::sleep(BLINK_ON).await;
                        led.set(false);
                        tokio::time::sleep(BLINK_OFF).await;
                    }
                }
            }
        }
        led.set(false);
    });
    (tx, handle)
}
