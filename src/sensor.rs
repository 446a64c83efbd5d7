//! Headless sensor service
//!
//! Pushes a `Perimeter Notification` whenever the door sensor changes and
//! drives the indicator LED on client command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::channel::{ChannelTransport, Connection};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::gpio::{GpioController, InputPin, OutputPin};
use crate::lifecycle::{CancellationReason, Deferral, HostLifecycle};
use crate::message::{Message, REQUEST_KEY, RESPONSE_KEY};
use crate::protocol::{Acknowledgement, ActuatorState, Command, Notification, SensorState};

/// A running sensor service
///
/// Cloning yields another handle to the same service.
pub struct SensorService<I, O> {
    inner: Arc<Inner<I, O>>,
}

impl<I, O> Clone for SensorService<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<I, O> {
    connection: Connection,
    sensor: I,
    led: Mutex<Actuator<O>>,
    deferral: Deferral,
    cancelled: AtomicBool,
}

struct Actuator<O> {
    pin: O,
    state: Option<ActuatorState>,
}

impl<I: InputPin, O: OutputPin> SensorService<I, O> {
    /// Bring the service up
    ///
    /// Opens the channel and both pins, announces the current perimeter state
    /// and only then starts taking commands. Returns once the service is
    /// running. The host deferral is completed if startup fails.
    pub async fn start<T, G, L>(
        config: &ServiceConfig,
        transport: &T,
        gpio: &G,
        lifecycle: &L,
    ) -> Result<Self>
    where
        T: ChannelTransport,
        G: GpioController<Input = I, Output = O>,
        L: HostLifecycle,
    {
        let deferral = lifecycle.get_deferral();
        match Self::initialize(config, transport, gpio, deferral.clone()).await {
            Ok(service) => Ok(service),
            Err(e) => {
                tracing::warn!(error = %e, "sensor service failed to start");
                deferral.complete();
                Err(e)
            }
        }
    }

    async fn initialize<T, G>(
        config: &ServiceConfig,
        transport: &T,
        gpio: &G,
        deferral: Deferral,
    ) -> Result<Self>
    where
        T: ChannelTransport,
        G: GpioController<Input = I, Output = O>,
    {
        let connection = transport.open().await?;
        let sensor = gpio.open_input(config.sensor_pin())?;
        let led = gpio.open_output(config.led_pin())?;

        // Subscribe before the announcement so no edge is lost in between.
        let changes = sensor.changes();

        let service = Self {
            inner: Arc::new(Inner {
                connection,
                sensor,
                led: Mutex::new(Actuator {
                    pin: led,
                    state: None,
                }),
                deferral,
                cancelled: AtomicBool::new(false),
            }),
        };

        if let Err(e) = service.notify_perimeter_state().await {
            tracing::warn!(error = %e, "startup notification failed");
        }

        let handler = service.clone();
        service.inner.connection.on_receive(move |request| {
            let service = handler.clone();
            async move { service.on_request_received(&request) }
        })?;

        let watcher = service.clone();
        service.inner.connection.spawn(async move {
            while changes.recv().await.is_ok() {
                if watcher.is_cancelled() {
                    break;
                }
                let service = watcher.clone();
                watcher
                    .inner
                    .connection
                    .spawn(async move { service.on_input_changed().await });
            }
        });

        let monitor = service.clone();
        service.inner.connection.spawn(async move {
            monitor.inner.connection.closed().await;
            monitor.on_cancel(CancellationReason::ConnectionClosed);
        });

        tracing::info!(
            service = config.service_name(),
            sensor_pin = config.sensor_pin(),
            led_pin = config.led_pin(),
            "sensor service running"
        );
        Ok(service)
    }

    /// Current perimeter state, read fresh from the sensor
    pub fn sensor_state(&self) -> Result<SensorState> {
        Ok(SensorState::from(self.inner.sensor.read()?))
    }

    /// LED state set by the last executed command, if any
    pub fn actuator_state(&self) -> Option<ActuatorState> {
        self.lock_led().state
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Read the sensor and push the resulting notification to the client
    ///
    /// The client's acknowledgement is only logged; a failed or missing
    /// acknowledgement is not retried.
    pub async fn notify_perimeter_state(&self) -> Result<Notification> {
        let notification = Notification::from(self.sensor_state()?);
        let reply = self
            .inner
            .connection
            .send(Message::notification(notification))
            .await?;

        match reply.get(RESPONSE_KEY).map(|v| (v, Acknowledgement::from_wire(v))) {
            Some((_, Some(ack))) if ack.is_ok() => {
                tracing::debug!(?notification, "client acknowledged notification")
            }
            Some((_, Some(ack))) => {
                tracing::warn!(?notification, response = %ack, "client rejected notification")
            }
            Some((value, None)) => {
                tracing::debug!(?notification, value, "unrecognized acknowledgement")
            }
            None => tracing::debug!(?notification, "client reply carried no response"),
        }
        Ok(notification)
    }

    async fn on_input_changed(&self) {
        if let Err(e) = self.notify_perimeter_state().await {
            tracing::warn!(error = %e, "failed to notify client of perimeter state");
        }
    }

    /// Execute a client request and build its response
    pub fn on_request_received(&self, request: &Message) -> Message {
        let ack = Acknowledgement::from(self.execute(request));
        if let Acknowledgement::Failed(reason) = &ack {
            tracing::warn!(reason = %reason, "request failed");
        }
        Message::response(&ack)
    }

    fn execute(&self, request: &Message) -> Result<()> {
        let Some(value) = request.get(REQUEST_KEY) else {
            tracing::debug!("request without a command ignored");
            return Ok(());
        };
        let Some(command) = Command::from_wire(value) else {
            tracing::debug!(value, "unrecognized command ignored");
            return Ok(());
        };

        let mut led = self.lock_led();
        led.pin.write(command.level())?;
        led.state = Some(ActuatorState::from(command));
        tracing::info!(%command, "command executed");
        Ok(())
    }

    /// Host cancellation: release the lifecycle. Safe to call repeatedly.
    pub fn on_cancel(&self, reason: CancellationReason) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!(?reason, "sensor service cancelled");
        }
        self.inner.deferral.complete();
    }

    fn lock_led(&self) -> std::sync::MutexGuard<'_, Actuator<O>> {
        self.inner.led.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
