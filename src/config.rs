use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Well-known name the sensor service is published under
pub const DEFAULT_SERVICE_NAME: &str = "PerimeterBreachService";

/// Package the sensor service publishes from unless configured otherwise
pub const DEFAULT_PACKAGE_NAME: &str = "perimeter-sensor";

/// Door sensor input (pull-up, High when the door is open)
pub const DEFAULT_SENSOR_PIN: u8 = 18;

/// Indicator LED output
pub const DEFAULT_LED_PIN: u8 = 23;

/// Settings shared by both endpoints of the channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    socket_dir: PathBuf,
    request_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir().join("perimeter"),
            request_timeout: None,
        }
    }
}

impl ChannelConfig {
    /// Create a new builder for ChannelConfig
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Directory providers publish their sockets in
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Bound on each request; `None` waits for the peer indefinitely
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

/// Builder for ChannelConfig
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    inner: ChannelConfig,
}

impl ChannelConfigBuilder {
    pub fn socket_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.inner.socket_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.inner.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ChannelConfig {
        self.inner
    }
}

/// Configuration for the sensor service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    service_name: String,
    package_family_name: String,
    sensor_pin: u8,
    led_pin: u8,
    channel: ChannelConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            package_family_name: DEFAULT_PACKAGE_NAME.to_string(),
            sensor_pin: DEFAULT_SENSOR_PIN,
            led_pin: DEFAULT_LED_PIN,
            channel: ChannelConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for ServiceConfig
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn package_family_name(&self) -> &str {
        &self.package_family_name
    }

    pub fn sensor_pin(&self) -> u8 {
        self.sensor_pin
    }

    pub fn led_pin(&self) -> u8 {
        self.led_pin
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }
}

/// Builder for ServiceConfig
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    inner: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.inner.service_name = name.into();
        self
    }

    pub fn package_family_name(mut self, name: impl Into<String>) -> Self {
        self.inner.package_family_name = name.into();
        self
    }

    pub fn sensor_pin(mut self, pin: u8) -> Self {
        self.inner.sensor_pin = pin;
        self
    }

    pub fn led_pin(mut self, pin: u8) -> Self {
        self.inner.led_pin = pin;
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.inner.channel = channel;
        self
    }

    pub fn build(self) -> Result<ServiceConfig> {
        let config = self.inner;
        validate_name("service name", &config.service_name)?;
        validate_name("package family name", &config.package_family_name)?;
        if config.sensor_pin == config.led_pin {
            return Err(Error::Config(format!(
                "sensor and LED cannot share pin {}",
                config.sensor_pin
            )));
        }
        Ok(config)
    }
}

/// Configuration for the client endpoint
#[derive(Debug, Clone)]
pub struct ClientConfig {
    service_name: String,
    channel: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            channel: ChannelConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new builder for ClientConfig
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    inner: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.inner.service_name = name.into();
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.inner.channel = channel;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        validate_name("service name", &self.inner.service_name)?;
        Ok(self.inner)
    }
}

// Names become path components under the socket directory.
fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config(format!("{what} cannot be empty")));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::Config(format!("invalid {what}: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::builder().build().unwrap();
        assert_eq!(config.service_name(), "PerimeterBreachService");
        assert_eq!(config.sensor_pin(), 18);
        assert_eq!(config.led_pin(), 23);
        assert_eq!(config.channel().request_timeout(), None);
    }

    #[test]
    fn test_rejects_shared_pin() {
        let result = ServiceConfig::builder().sensor_pin(5).led_pin(5).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_path_like_names() {
        assert!(ClientConfig::builder().service_name("").build().is_err());
        assert!(
            ServiceConfig::builder()
                .package_family_name("../escape")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_channel_builder() {
        let channel = ChannelConfig::builder()
            .socket_dir("/run/perimeter")
            .request_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(channel.socket_dir(), Path::new("/run/perimeter"));
        assert_eq!(channel.request_timeout(), Some(Duration::from_secs(3)));
    }
}
