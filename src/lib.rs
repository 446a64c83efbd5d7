//! Perimeter - a duplex link between a headless sensor service and its client
//!
//! The sensor service watches a door sensor and pushes a notification to the
//! client whenever the perimeter changes state. The client sends commands that
//! switch an indicator LED on the service side. Both directions use the same
//! channel, and every message either side sends is answered with exactly one
//! `Response`.
//!
//! # Example
//!
//! ```rust,ignore
//! use perimeter::{
//!     ProcessLifecycle, SensorService, ServiceConfig, SimulatedGpio, SocketAcceptor,
//!     SocketDirectory,
//! };
//!
//! async fn run_service(executor: impl executor_core::Executor + Clone + Send + Sync + 'static)
//!     -> perimeter::Result<()>
//! {
//!     let config = ServiceConfig::builder().build()?;
//!     let endpoint = SocketDirectory::new(config.channel().socket_dir())
//!         .endpoint(config.package_family_name(), config.service_name());
//!     let transport = SocketAcceptor::bind(endpoint, executor, None)?;
//!
//!     let lifecycle = ProcessLifecycle::new();
//!     let gpio = SimulatedGpio::new();
//!     let _service = SensorService::start(&config, &transport, &gpio, &lifecycle).await?;
//!
//!     lifecycle.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! # Wire protocol
//!
//! | Direction       | Key                      | Values                          |
//! |-----------------|--------------------------|---------------------------------|
//! | client → sensor | `Request`                | `Turn LED On` \| `Turn LED Off` |
//! | sensor → client | `Perimeter Notification` | `Breached` \| `Secure`          |
//! | either way      | `Response`               | `OK` \| `Failed: <text>`        |

pub mod channel;
mod client;
mod config;
mod discovery;
mod error;
mod gpio;
mod lifecycle;
mod message;
mod protocol;
mod sensor;

// Re-export public types
pub use channel::{
    ChannelTransport, Connection, ProvidedConnection, SocketAcceptor, SocketConnector,
};
pub use client::{ClientEndpoint, StatusLine, StatusView, Tone, on_notification_received};
pub use config::{
    ChannelConfig, ChannelConfigBuilder, ClientConfig, ClientConfigBuilder, DEFAULT_LED_PIN,
    DEFAULT_PACKAGE_NAME, DEFAULT_SENSOR_PIN, DEFAULT_SERVICE_NAME, ServiceConfig,
    ServiceConfigBuilder,
};
pub use discovery::{DiscoveryService, ProviderDescriptor, SocketDirectory, select_provider};
pub use error::{Error, Result};
pub use gpio::{GpioController, InputPin, OutputPin, PinValue, SimulatedGpio, SimulatedPin};
pub use lifecycle::{CancellationReason, Deferral, HostLifecycle, ProcessLifecycle};
pub use message::{Message, NOTIFICATION_KEY, REQUEST_KEY, RESPONSE_KEY};
pub use protocol::{Acknowledgement, ActuatorState, Command, Notification, SensorState};
pub use sensor::SensorService;
