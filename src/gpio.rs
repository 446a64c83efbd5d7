//! GPIO seam for the sensor input and the actuator output
//!
//! The service only needs a level it can read, an edge it can subscribe to and
//! a level it can write. [`SimulatedGpio`] provides in-memory pins for tests
//! and for running the service without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use smol::channel::{self, Receiver, Sender};

use crate::error::{Error, Result};

/// A binary pin level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinValue {
    #[default]
    Low,
    High,
}

impl PinValue {
    pub fn is_high(self) -> bool {
        self == PinValue::High
    }
}

/// A pin opened for input
pub trait InputPin: Send + Sync + 'static {
    fn read(&self) -> Result<PinValue>;

    /// Subscribe to level changes. One `()` is delivered per edge.
    fn changes(&self) -> Receiver<()>;
}

/// A pin opened for output
pub trait OutputPin: Send + 'static {
    fn write(&mut self, value: PinValue) -> Result<()>;
}

/// Opens pins by number
pub trait GpioController {
    type Input: InputPin;
    type Output: OutputPin;

    fn open_input(&self, pin: u8) -> Result<Self::Input>;

    fn open_output(&self, pin: u8) -> Result<Self::Output>;
}

#[derive(Debug, Default)]
struct PinState {
    level: Mutex<PinValue>,
    subscribers: Mutex<Vec<Sender<()>>>,
    writes: AtomicUsize,
    fault: Mutex<Option<String>>,
}

/// An in-memory pin
///
/// Clones share the same level, so a test can keep a handle and drive or
/// inspect the pin the service opened.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPin {
    number: u8,
    state: Arc<PinState>,
}

impl SimulatedPin {
    pub fn new(number: u8) -> Self {
        Self {
            number,
            state: Arc::default(),
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn level(&self) -> PinValue {
        *self
            .state
            .level
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive the pin externally; subscribers are told only on an edge
    pub fn set_level(&self, value: PinValue) {
        let changed = {
            let mut level = self
                .state
                .level
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let changed = *level != value;
            *level = value;
            changed
        };
        if changed {
            tracing::debug!(pin = self.number, ?value, "simulated pin changed");
            let mut subscribers = self
                .state
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|tx| tx.try_send(()).is_ok());
        }
    }

    /// Number of successful writes through [`OutputPin::write`]
    pub fn write_count(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Make every read and write fail with `message` until cleared with `None`
    pub fn inject_fault(&self, message: Option<&str>) {
        *self
            .state
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = message.map(str::to_string);
    }

    fn check_fault(&self) -> Result<()> {
        match &*self
            .state
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            Some(message) => Err(Error::Gpio(format!("pin {}: {message}", self.number))),
            None => Ok(()),
        }
    }
}

impl InputPin for SimulatedPin {
    fn read(&self) -> Result<PinValue> {
        self.check_fault()?;
        Ok(self.level())
    }

    fn changes(&self) -> Receiver<()> {
        let (tx, rx) = channel::unbounded();
        self.state
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

impl OutputPin for SimulatedPin {
    fn write(&mut self, value: PinValue) -> Result<()> {
        self.check_fault()?;
        self.set_level(value);
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A controller handing out [`SimulatedPin`]s
///
/// Each pin number can be opened once, like a real controller.
#[derive(Debug, Default)]
pub struct SimulatedGpio {
    pins: Mutex<HashMap<u8, SimulatedPin>>,
    opened: Mutex<HashSet<u8>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to pin `number`, created on first use
    pub fn pin(&self, number: u8) -> SimulatedPin {
        self.pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(number)
            .or_insert_with(|| SimulatedPin::new(number))
            .clone()
    }

    fn open(&self, number: u8) -> Result<SimulatedPin> {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        if !opened.insert(number) {
            return Err(Error::Gpio(format!("pin {number} is already open")));
        }
        Ok(self.pin(number))
    }
}

impl GpioController for SimulatedGpio {
    type Input = SimulatedPin;
    type Output = SimulatedPin;

    fn open_input(&self, pin: u8) -> Result<SimulatedPin> {
        self.open(pin)
    }

    fn open_output(&self, pin: u8) -> Result<SimulatedPin> {
        self.open(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_fire_on_edges_only() {
        let pin = SimulatedPin::new(18);
        let changes = pin.changes();

        pin.set_level(PinValue::Low);
        assert!(changes.try_recv().is_err());

        pin.set_level(PinValue::High);
        pin.set_level(PinValue::High);
        assert!(changes.try_recv().is_ok());
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_pin_opens_once() {
        let gpio = SimulatedGpio::new();
        assert!(gpio.open_input(18).is_ok());
        assert!(matches!(gpio.open_output(18), Err(Error::Gpio(_))));
        assert!(gpio.open_output(23).is_ok());
    }

    #[test]
    fn test_fault_injection() {
        let mut pin = SimulatedPin::new(23);
        pin.inject_fault(Some("bus error"));
        assert!(pin.write(PinValue::High).is_err());
        assert!(pin.read().is_err());
        assert_eq!(pin.write_count(), 0);

        pin.inject_fault(None);
        pin.write(PinValue::High).unwrap();
        assert_eq!(pin.read().unwrap(), PinValue::High);
        assert_eq!(pin.write_count(), 1);
    }
}
