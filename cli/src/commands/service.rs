use anyhow::Context;
use executor_core::tokio::TokioGlobal;
use futures_lite::{StreamExt, future};

use perimeter::{
    CancellationReason, PinValue, ProcessLifecycle, SensorService, ServiceConfig, SimulatedGpio,
    SimulatedPin, SocketAcceptor, SocketDirectory,
};

use crate::cli::{InitialState, ServiceArgs};
use crate::commands::stdin_lines;
use crate::error::CliResult;

type ConsoleService = SensorService<SimulatedPin, SimulatedPin>;

pub async fn execute(args: ServiceArgs, config: ServiceConfig) -> CliResult<()> {
    let endpoint = SocketDirectory::new(config.channel().socket_dir())
        .endpoint(config.package_family_name(), config.service_name());
    let transport = SocketAcceptor::bind(&endpoint, TokioGlobal, config.channel().request_timeout())
        .with_context(|| format!("failed to publish service at {}", endpoint.display()))?;

    let gpio = SimulatedGpio::new();
    let sensor = gpio.pin(config.sensor_pin());
    sensor.set_level(match args.initial {
        InitialState::Secure => PinValue::Low,
        InitialState::Breached => PinValue::High,
    });

    let lifecycle = ProcessLifecycle::new();
    tracing::info!(path = %endpoint.display(), "waiting for a client");
    let service = SensorService::start(&config, &transport, &gpio, &lifecycle)
        .await
        .context("failed to start sensor service")?;

    let console = async {
        drive_sensor(&service, &sensor).await?;
        service.on_cancel(CancellationReason::Terminating);
        CliResult::Ok(())
    };
    let revoked = async {
        lifecycle.wait().await;
        CliResult::Ok(())
    };
    future::or(console, revoked).await?;

    service.connection().close();
    Ok(())
}

/// Drive the simulated sensor from stdin until it closes or `quit` is read
async fn drive_sensor(service: &ConsoleService, sensor: &SimulatedPin) -> CliResult<()> {
    let mut lines = stdin_lines();
    while let Some(line) = lines.next().await {
        let line = line.context("failed to read stdin")?;
        match line.trim() {
            "" => {}
            "breach" | "open" => sensor.set_level(PinValue::High),
            "secure" | "close" => sensor.set_level(PinValue::Low),
            "status" => println!(
                "sensor (pin {}): {:?}, led: {:?}",
                sensor.number(),
                service.sensor_state()?,
                service.actuator_state()
            ),
            "quit" | "exit" => break,
            other => eprintln!("unknown input `{other}` (expected breach, secure, status or quit)"),
        }
    }
    Ok(())
}
