use anyhow::Result;
use blinky_controller::domain::models::{Channel, ChannelValue, ControlMode, MessageSeverity, PeerId, Rgb};
use blinky_controller::domain::settings::SettingsService;
use blinky_controller::infrastructure::bluetooth::transport::EventSender;
use blinky_controller::infrastructure::bluetooth::{DeviceSession, Transport};
use blinky_controller::infrastructure::logging;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A line typed on stdin.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    On,
    Off,
    Color(Rgb),
    Mode(ControlMode),
    Battery,
    Reconnect,
    Disconnect,
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next()?.to_lowercase().as_str() {
        "on" => ConsoleCommand::On,
        "off" => ConsoleCommand::Off,
        "color" => {
            let hex = words.next()?.trim_start_matches('#');
            if hex.len() != 6 {
                return None;
            }
            ConsoleCommand::Color(Rgb::from_packed(u32::from_str_radix(hex, 16).ok()?))
        }
        "mode" => ConsoleCommand::Mode(ControlMode::from_index(words.next()?.parse().ok()?)?),
        "battery" => ConsoleCommand::Battery,
        "reconnect" => ConsoleCommand::Reconnect,
        "disconnect" => ConsoleCommand::Disconnect,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => return None,
    };
    Some(command)
}

#[cfg(windows)]
fn platform_transport(
    events: EventSender,
    settings: &blinky_controller::domain::settings::TransportSettings,
) -> impl Transport {
    blinky_controller::infrastructure::bluetooth::winrt::WinRtTransport::new(events, settings.clone())
}

#[cfg(not(windows))]
fn platform_transport(
    _events: EventSender,
    _settings: &blinky_controller::domain::settings::TransportSettings,
) -> impl Transport {
    warn!("No Bluetooth backend for this platform");
    blinky_controller::infrastructure::bluetooth::UnavailableTransport
}

fn watch_session(session: &DeviceSession) {
    let mut phase = session.phase();
    tokio::spawn(async move {
        while let Some(phase) = phase.changed().await {
            info!("Connection phase: {:?}", phase);
        }
    });

    let mut diagnostics = session.diagnostics();
    tokio::spawn(async move {
        while let Ok(msg) = diagnostics.recv().await {
            match msg.severity {
                MessageSeverity::Error => error!("{}", msg.message),
                MessageSeverity::Warning => warn!("{}", msg.message),
                _ => info!("{}", msg.message),
            }
        }
    });

    let streams = session.streams();
    let mut on_off = streams.on_off;
    tokio::spawn(async move {
        while let Some(value) = on_off.changed().await {
            if let Some(on) = value {
                info!("LED is {}", if on { "ON" } else { "OFF" });
            }
        }
    });
    let mut color = streams.color;
    tokio::spawn(async move {
        while let Some(value) = color.changed().await {
            if let Some(rgb) = value {
                info!("Color: {}", rgb);
            }
        }
    });
    let mut battery = streams.battery;
    tokio::spawn(async move {
        while let Some(value) = battery.changed().await {
            if let Some(volts) = value {
                info!(
                    "Battery: {:.2} V ({}%)",
                    volts,
                    blinky_controller::infrastructure::bluetooth::protocol::battery_percent(volts)
                );
            }
        }
    });
}

async fn run_console(session: &DeviceSession) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(ConsoleCommand::On) => session.set_on_off(true),
            Some(ConsoleCommand::Off) => session.set_on_off(false),
            Some(ConsoleCommand::Color(rgb)) => session.set_color(rgb),
            Some(ConsoleCommand::Mode(mode)) => {
                match session.write(ChannelValue::Mode(mode.index())).await {
                    Ok(_) => info!("Mode set to {:?}", mode),
                    Err(e) => warn!("Failed to set mode: {}", e),
                }
            }
            Some(ConsoleCommand::Battery) => match session.read(Channel::Battery).await {
                Ok(value) => info!("Battery read: {:?}", value),
                Err(e) => warn!("Battery read failed: {}", e),
            },
            Some(ConsoleCommand::Reconnect) => {
                if let Err(e) = session.reconnect().await {
                    error!("Reconnect failed: {}", e);
                }
            }
            Some(ConsoleCommand::Disconnect) => session.disconnect(),
            Some(ConsoleCommand::Quit) => break,
            None => warn!(
                "Unknown command: {} (on, off, color RRGGBB, mode 0-3, battery, reconnect, disconnect, quit)",
                line.trim()
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Blinky Controller");
    info!("Settings file: {}", settings_service.path().display());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = platform_transport(events_tx, &settings.transport);
    let (session, task) = DeviceSession::spawn(transport, events_rx, &settings.session);
    watch_session(&session);

    let peer = std::env::args().nth(1).or(settings.peer_address.clone());
    match peer {
        Some(peer) => {
            if let Err(e) = session.connect(PeerId::new(peer)).await {
                error!("Connection failed: {}", e);
            }
        }
        None => warn!("No peer address given; pass one as the first argument or set peer_address"),
    }

    if settings.session.battery_refresh_interval_ms > 0 {
        let refresher = session.clone();
        let period = Duration::from_millis(settings.session.battery_refresh_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                refresher.refresh_battery();
            }
        });
    }

    tokio::select! {
        _ = run_console(&session) => {}
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
    }

    session.disconnect();
    session.shutdown();
    task.await?;
    info!("Blinky Controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_led_commands() {
        assert_eq!(parse_command("on"), Some(ConsoleCommand::On));
        assert_eq!(parse_command("  OFF "), Some(ConsoleCommand::Off));
        assert_eq!(
            parse_command("color #FF0080"),
            Some(ConsoleCommand::Color(Rgb::new(255, 0, 128)))
        );
        assert_eq!(parse_command("color FF00"), None);
    }

    #[test]
    fn test_parse_mode_command() {
        assert_eq!(
            parse_command("mode 2"),
            Some(ConsoleCommand::Mode(ControlMode::PartyModeFlowing))
        );
        assert_eq!(parse_command("mode 9"), None);
        assert_eq!(parse_command("mode"), None);
        assert_eq!(parse_command("dance"), None);
    }
}
