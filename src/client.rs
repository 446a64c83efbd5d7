//! User-facing client endpoint
//!
//! Sends LED commands to the sensor service and shows the perimeter
//! notifications it pushes. What the user sees goes through a [`StatusView`].

use std::sync::Arc;

use executor_core::Executor;
use serde::Serialize;

use crate::channel::{ChannelTransport, Connection, SocketConnector};
use crate::config::ClientConfig;
use crate::discovery::{DiscoveryService, select_provider};
use crate::error::{Error, Result};
use crate::message::{Message, NOTIFICATION_KEY, RESPONSE_KEY};
use crate::protocol::{Acknowledgement, Command, Notification};

/// How urgently a status line should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Normal,
    Alert,
}

/// One line of user-visible status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub text: String,
    pub tone: Tone,
}

impl StatusLine {
    pub fn normal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Normal,
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Alert,
        }
    }
}

impl From<Notification> for StatusLine {
    fn from(notification: Notification) -> Self {
        match notification {
            Notification::Breached => StatusLine::alert("Perimeter Breached!!! Alert!!!"),
            Notification::Secure => StatusLine::normal("Perimeter Secured... Move along..."),
        }
    }
}

/// Where the client surfaces status to its user
pub trait StatusView: Send + Sync + 'static {
    fn show(&self, status: &StatusLine) -> Result<()>;
}

/// The client end of the perimeter link
///
/// A failed connect leaves the endpoint disconnected but usable: commands then
/// report the failure on the view instead of erroring.
pub struct ClientEndpoint<V> {
    connection: Option<Connection>,
    view: Arc<V>,
}

impl<V: StatusView> ClientEndpoint<V> {
    /// Discover the service provider and connect to it
    pub async fn connect<D, E>(config: &ClientConfig, discovery: &D, executor: E, view: V) -> Self
    where
        D: DiscoveryService,
        E: Executor + Clone + Send + Sync + 'static,
    {
        let service_name = config.service_name();
        let provider = match discovery.find_providers(service_name).await {
            Ok(providers) => select_provider(service_name, &providers).cloned(),
            Err(e) => Err(e),
        };

        match provider {
            Ok(provider) => {
                tracing::debug!(
                    package = %provider.package_family_name,
                    "binding to provider"
                );
                let transport = SocketConnector::new(
                    service_name,
                    &provider.endpoint,
                    executor,
                    config.channel().request_timeout(),
                );
                Self::open(&transport, view).await
            }
            Err(e) => Self::disconnected(Arc::new(view), e),
        }
    }

    /// Open the channel through `transport` and start taking notifications
    pub async fn open<T: ChannelTransport>(transport: &T, view: V) -> Self {
        let view = Arc::new(view);
        let connection = match transport.open().await {
            Ok(connection) => connection,
            Err(e) => return Self::disconnected(view, e),
        };

        // Pushes are shown in arrival order so the display ends on the latest state.
        let handler_view = Arc::clone(&view);
        let registered = connection.on_receive_ordered(move |message| {
            let view = Arc::clone(&handler_view);
            async move { on_notification_received(view.as_ref(), &message) }
        });
        if let Err(e) = registered {
            connection.close();
            return Self::disconnected(view, e);
        }

        Self {
            connection: Some(connection),
            view,
        }
    }

    fn disconnected(view: Arc<V>, error: Error) -> Self {
        tracing::warn!(error = %error, "could not connect to the service");
        surface(
            view.as_ref(),
            StatusLine::alert(format!("Could not connect to the service: {error}")),
        );
        Self {
            connection: None,
            view,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| !c.is_closed())
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Send `command` and surface the service's response
    pub async fn send_command(&self, command: Command) -> StatusLine {
        let status = match self.round_trip(command).await {
            Ok(response) => StatusLine::normal(response),
            Err(e) => {
                tracing::warn!(%command, error = %e, "command failed");
                StatusLine::alert(format!("Something went wrong: {e}"))
            }
        };
        surface(self.view.as_ref(), status.clone());
        status
    }

    async fn round_trip(&self, command: Command) -> Result<String> {
        let connection = self.connection.as_ref().ok_or(Error::NotConnected)?;
        let reply = connection.send(Message::request(command)).await?;
        reply
            .get(RESPONSE_KEY)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidProtocol("reply carried no response".to_string()))
    }

    /// Close the channel to the service. Dropping the endpoint has the same effect.
    pub fn close(&self) {
        if let Some(connection) = &self.connection {
            connection.close();
        }
    }
}

/// Show a pushed notification and acknowledge it
///
/// Unrecognized notifications leave the display untouched and are still
/// acknowledged `OK`.
pub fn on_notification_received<V: StatusView + ?Sized>(view: &V, message: &Message) -> Message {
    let result = match message.get(NOTIFICATION_KEY).map(|v| (v, Notification::from_wire(v))) {
        Some((_, Some(notification))) => {
            tracing::debug!(?notification, "perimeter notification");
            view.show(&StatusLine::from(notification))
        }
        Some((value, None)) => {
            tracing::debug!(value, "unrecognized notification ignored");
            Ok(())
        }
        None => {
            tracing::debug!("request without a notification ignored");
            Ok(())
        }
    };
    Message::response(&Acknowledgement::from(result))
}

fn surface<V: StatusView + ?Sized>(view: &V, status: StatusLine) {
    if let Err(e) = view.show(&status) {
        tracing::warn!(error = %e, "failed to display status");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, PoisonError};

    use executor_core::tokio::TokioGlobal;
    use futures_lite::future::zip;

    use super::*;
    use crate::channel::ProvidedConnection;
    use crate::config::ServiceConfig;
    use crate::discovery::SocketDirectory;
    use crate::gpio::{PinValue, SimulatedGpio};
    use crate::lifecycle::ProcessLifecycle;
    use crate::message::REQUEST_KEY;
    use crate::sensor::SensorService;

    #[derive(Default)]
    struct RecordingView {
        lines: Mutex<Vec<StatusLine>>,
        broken: bool,
    }

    impl RecordingView {
        fn lines(&self) -> Vec<StatusLine> {
            self.lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn last(&self) -> Option<StatusLine> {
            self.lines().last().cloned()
        }
    }

    impl StatusView for RecordingView {
        fn show(&self, status: &StatusLine) -> Result<()> {
            if self.broken {
                return Err(Error::Display("screen unplugged".to_string()));
            }
            self.lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(status.clone());
            Ok(())
        }
    }

    #[test]
    fn test_notifications_map_to_display() {
        let view = RecordingView::default();

        let reply = on_notification_received(&view, &Message::notification(Notification::Breached));
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));
        assert_eq!(
            view.last(),
            Some(StatusLine::alert("Perimeter Breached!!! Alert!!!"))
        );

        on_notification_received(&view, &Message::notification(Notification::Secure));
        assert_eq!(
            view.last(),
            Some(StatusLine::normal("Perimeter Secured... Move along..."))
        );
    }

    #[test]
    fn test_unknown_notification_keeps_display() {
        let view = RecordingView::default();
        on_notification_received(&view, &Message::notification(Notification::Breached));

        let reply = on_notification_received(
            &view,
            &Message::new().with(NOTIFICATION_KEY, "Sideways"),
        );
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));
        let reply = on_notification_received(&view, &Message::new().with("Other", "x"));
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));

        assert_eq!(view.lines().len(), 1);
    }

    #[test]
    fn test_view_fault_becomes_failed_response() {
        let view = RecordingView {
            broken: true,
            ..Default::default()
        };
        let reply = on_notification_received(&view, &Message::notification(Notification::Secure));
        assert_eq!(
            reply.get(RESPONSE_KEY),
            Some("Failed: display error: screen unplugged")
        );
    }

    #[tokio::test]
    async fn test_zero_providers_surfaces_error_and_stays_usable() {
        let config = ClientConfig::default();
        let discovery = SocketDirectory::new(std::env::temp_dir().join(format!(
            "perimeter-no-providers-{}",
            std::process::id()
        )));

        let client =
            ClientEndpoint::connect(&config, &discovery, TokioGlobal, RecordingView::default())
                .await;
        assert!(!client.is_connected());
        let status = client.view().last().unwrap();
        assert_eq!(status.tone, Tone::Alert);
        assert!(status.text.starts_with("Could not connect to the service: "));

        let status = client.send_command(Command::TurnOn).await;
        assert_eq!(status, StatusLine::alert("Something went wrong: not connected"));
    }

    #[tokio::test]
    async fn test_command_round_trip_through_sensor() {
        let gpio = SimulatedGpio::new();
        gpio.pin(18).set_level(PinValue::High);
        let (client_end, service_end) = Connection::pair(TokioGlobal, None).unwrap();

        let client = ClientEndpoint::open(
            &ProvidedConnection::new(client_end),
            RecordingView::default(),
        )
        .await;
        assert!(client.is_connected());

        let lifecycle = ProcessLifecycle::new();
        let _service = SensorService::start(
            &ServiceConfig::default(),
            &ProvidedConnection::new(service_end),
            &gpio,
            &lifecycle,
        )
        .await
        .unwrap();

        // The startup announcement was acknowledged before start returned.
        assert_eq!(
            client.view().lines()[0],
            StatusLine::alert("Perimeter Breached!!! Alert!!!")
        );

        let status = client.send_command(Command::TurnOn).await;
        assert_eq!(status, StatusLine::normal("OK"));
        assert_eq!(gpio.pin(23).level(), PinValue::High);

        let status = client.send_command(Command::TurnOff).await;
        assert_eq!(status, StatusLine::normal("OK"));
        assert_eq!(gpio.pin(23).level(), PinValue::Low);
        assert_eq!(client.view().last(), Some(StatusLine::normal("OK")));
    }

    #[tokio::test]
    async fn test_reply_without_response_is_an_alert() {
        let (client_end, service_end) = Connection::pair(TokioGlobal, None).unwrap();
        service_end
            .on_receive(|_request: Message| async { Message::new().with("Other", "x") })
            .unwrap();
        let client = ClientEndpoint::open(
            &ProvidedConnection::new(client_end),
            RecordingView::default(),
        )
        .await;

        let status = client.send_command(Command::TurnOn).await;
        assert_eq!(
            status,
            StatusLine::alert("Something went wrong: invalid protocol: reply carried no response")
        );
    }

    #[tokio::test]
    async fn test_notifications_shown_in_arrival_order() {
        let (client_end, service_end) = Connection::pair(TokioGlobal, None).unwrap();
        let client = ClientEndpoint::open(
            &ProvidedConnection::new(client_end),
            RecordingView::default(),
        )
        .await;

        let pushes = [
            Notification::Breached,
            Notification::Secure,
            Notification::Breached,
            Notification::Secure,
        ];
        // zip polls left to right, so the pushes hit the wire in array order.
        let [a, b, c, d] = pushes.map(|n| service_end.send(Message::notification(n)));
        let ((a, b), (c, d)) = zip(zip(a, b), zip(c, d)).await;
        for reply in [a, b, c, d] {
            assert_eq!(reply.unwrap().get(RESPONSE_KEY), Some("OK"));
        }

        let expected: Vec<_> = pushes.into_iter().map(StatusLine::from).collect();
        assert_eq!(client.view().lines(), expected);
    }

    #[tokio::test]
    async fn test_dropping_client_releases_service() {
        let gpio = SimulatedGpio::new();
        let (client_end, service_end) = Connection::pair(TokioGlobal, None).unwrap();
        let client = ClientEndpoint::open(
            &ProvidedConnection::new(client_end),
            RecordingView::default(),
        )
        .await;

        let lifecycle = ProcessLifecycle::new();
        let service = SensorService::start(
            &ServiceConfig::default(),
            &ProvidedConnection::new(service_end),
            &gpio,
            &lifecycle,
        )
        .await
        .unwrap();

        drop(client);
        tokio::time::timeout(std::time::Duration::from_secs(5), lifecycle.wait())
            .await
            .unwrap();
        assert!(service.is_cancelled());
        assert!(service.connection().is_closed());
    }

    #[tokio::test]
    async fn test_connect_through_discovery() {
        let root = std::env::temp_dir().join(format!(
            "perimeter-client-discovery-{}",
            std::process::id()
        ));
        let directory = SocketDirectory::new(&root);
        let service = ServiceConfig::default();
        let acceptor = crate::channel::SocketAcceptor::bind(
            directory.endpoint(service.package_family_name(), service.service_name()),
            TokioGlobal,
            None,
        )
        .unwrap();

        let config = ClientConfig::default();
        let (server, client) = zip(
            acceptor.open(),
            ClientEndpoint::connect(&config, &directory, TokioGlobal, RecordingView::default()),
        )
        .await;
        let server = server.unwrap();
        assert!(client.is_connected());

        server
            .on_receive(|request: Message| async move {
                let value = request.get(REQUEST_KEY).unwrap_or_default().to_string();
                Message::new().with(RESPONSE_KEY, format!("ran {value}"))
            })
            .unwrap();
        let status = client.send_command(Command::TurnOff).await;
        assert_eq!(status, StatusLine::normal("ran Turn LED Off"));

        let _ = std::fs::remove_dir_all(&root);
    }
}
