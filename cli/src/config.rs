use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use perimeter::{ChannelConfig, ClientConfig, ServiceConfig};

use crate::cli::{CommonArgs, ServiceArgs};

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Channel settings shared by both endpoints
    pub channel: ChannelSection,

    /// Sensor service settings
    pub service: ServiceSection,

    /// Client settings
    pub client: ClientSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    pub socket_dir: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: Option<String>,
    pub package: Option<String>,
    pub sensor_pin: Option<u8>,
    pub led_pin: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Name of the service to discover (defaults to `service.name`)
    pub service_name: Option<String>,
}

/// Load config from file
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}

fn parse_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

/// Merge file config with CLI args into the service configuration (CLI takes precedence)
pub fn service_config(file: &FileConfig, args: &ServiceArgs) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder().channel(channel_config(file, &args.common));

    if let Some(name) = args
        .common
        .service_name
        .clone()
        .or_else(|| file.service.name.clone())
    {
        builder = builder.service_name(name);
    }
    if let Some(package) = args.package.clone().or_else(|| file.service.package.clone()) {
        builder = builder.package_family_name(package);
    }
    if let Some(pin) = args.sensor_pin.or(file.service.sensor_pin) {
        builder = builder.sensor_pin(pin);
    }
    if let Some(pin) = args.led_pin.or(file.service.led_pin) {
        builder = builder.led_pin(pin);
    }

    builder.build().context("invalid service configuration")
}

/// Merge file config with CLI args into the client configuration (CLI takes precedence)
pub fn client_config(file: &FileConfig, common: &CommonArgs) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder().channel(channel_config(file, common));

    // CLI > [client] > [service]
    let name = common
        .service_name
        .clone()
        .or_else(|| file.client.service_name.clone())
        .or_else(|| file.service.name.clone());
    if let Some(name) = name {
        builder = builder.service_name(name);
    }

    builder.build().context("invalid client configuration")
}

fn channel_config(file: &FileConfig, common: &CommonArgs) -> ChannelConfig {
    let mut builder = ChannelConfig::builder();

    if let Some(dir) = common
        .socket_dir
        .clone()
        .or_else(|| file.channel.socket_dir.clone())
    {
        builder = builder.socket_dir(dir);
    }
    if let Some(ms) = common.request_timeout_ms.or(file.channel.request_timeout_ms) {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }

    builder.build()
}
