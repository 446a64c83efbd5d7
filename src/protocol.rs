//! Perimeter protocol vocabulary
//!
//! | Direction       | Key                      | Values                          |
//! |-----------------|--------------------------|---------------------------------|
//! | client → sensor | `Request`                | `Turn LED On` \| `Turn LED Off` |
//! | sensor → client | `Perimeter Notification` | `Breached` \| `Secure`          |
//! | either way      | `Response`               | `OK` \| `Failed: <text>`        |

use std::fmt;

use crate::gpio::PinValue;

/// A command the client asks the sensor service to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
}

impl Command {
    pub fn as_wire(self) -> &'static str {
        match self {
            Command::TurnOn => "Turn LED On",
            Command::TurnOff => "Turn LED Off",
        }
    }

    /// Parse a `Request` value. Unrecognized values yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Turn LED On" => Some(Command::TurnOn),
            "Turn LED Off" => Some(Command::TurnOff),
            _ => None,
        }
    }

    /// Output level this command drives the actuator to
    pub fn level(self) -> PinValue {
        match self {
            Command::TurnOn => PinValue::High,
            Command::TurnOff => PinValue::Low,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// State of the perimeter as read from the sensor input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Breached,
    Secure,
}

impl From<PinValue> for SensorState {
    /// The sensor is pulled up: an open door reads High.
    fn from(value: PinValue) -> Self {
        if value.is_high() {
            SensorState::Breached
        } else {
            SensorState::Secure
        }
    }
}

/// State of the actuator, owned by the sensor service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    On,
    Off,
}

impl From<Command> for ActuatorState {
    fn from(command: Command) -> Self {
        match command {
            Command::TurnOn => ActuatorState::On,
            Command::TurnOff => ActuatorState::Off,
        }
    }
}

/// A state push from the sensor service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Breached,
    Secure,
}

impl Notification {
    pub fn as_wire(self) -> &'static str {
        match self {
            Notification::Breached => "Breached",
            Notification::Secure => "Secure",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Breached" => Some(Notification::Breached),
            "Secure" => Some(Notification::Secure),
            _ => None,
        }
    }
}

impl From<SensorState> for Notification {
    fn from(state: SensorState) -> Self {
        match state {
            SensorState::Breached => Notification::Breached,
            SensorState::Secure => Notification::Secure,
        }
    }
}

/// Value of a `Response` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Ok,
    Failed(String),
}

impl Acknowledgement {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Acknowledgement::Failed(reason.to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Acknowledgement::Ok)
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        if value == "OK" {
            Some(Acknowledgement::Ok)
        } else {
            value
                .strip_prefix("Failed: ")
                .map(|reason| Acknowledgement::Failed(reason.to_string()))
        }
    }
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acknowledgement::Ok => f.write_str("OK"),
            Acknowledgement::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

impl<E: fmt::Display> From<Result<(), E>> for Acknowledgement {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Acknowledgement::Ok,
            Err(e) => Acknowledgement::failed(e),
        }
    }
}
