use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "perimeter")]
#[command(version)]
#[command(about = "Perimeter breach sensor service and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the headless sensor service (stdin: `breach`, `secure`)
    Service(ServiceArgs),

    /// Connect to the sensor service (stdin: `on`, `off`)
    Client(ClientArgs),
}

#[derive(Args)]
pub struct ServiceArgs {
    /// Package family name to publish the service under
    #[arg(long)]
    pub package: Option<String>,

    /// Sensor input pin number
    #[arg(long)]
    pub sensor_pin: Option<u8>,

    /// LED output pin number
    #[arg(long)]
    pub led_pin: Option<u8>,

    /// Sensor reading at startup
    #[arg(long, default_value = "secure", value_enum)]
    pub initial: InitialState,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct ClientArgs {
    /// Print status lines as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Common arguments shared across subcommands
#[derive(Args)]
pub struct CommonArgs {
    /// Directory provider sockets are published in
    #[arg(long, env = "PERIMETER_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,

    /// Well-known service name
    #[arg(long)]
    pub service_name: Option<String>,

    /// Give up on a request after this many milliseconds (default: wait forever)
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum InitialState {
    /// Door closed (input low)
    #[default]
    Secure,
    /// Door open (input high)
    Breached,
}
