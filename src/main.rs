use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use housekeeping::config::{DEFAULT_READ_TIMEOUT, MOVE_BUFFER_TIME, POLL_PERIOD};
use housekeeping::devices::cryotel::{self, CryotelAvc, FleetMode};
use housekeeping::devices::{DeviceKind, Housekeeping};
use housekeeping::motor::{self, MotorController, MoveOptions, MoveType};
use housekeeping::runtime::{self, RuntimeResult};
use housekeeping::transport::{SerialSettings, SerialTransport, TcpTransport, Transport};

#[derive(Parser)]
#[command(name = "housekeeping", about = "Lab instrument control and housekeeping logging")]
struct Cli {
    #[command(flatten)]
    link: Link,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Link {
    /// Serial port, e.g. /dev/ttyUSB0 or COM10 (comma separated for several cryocoolers)
    #[arg(long, value_delimiter = ',', conflicts_with = "tcp", required_unless_present = "tcp")]
    port: Vec<String>,

    /// TCP address of a serial server, e.g. 192.168.0.12:7777
    #[arg(long)]
    tcp: Option<String>,

    /// Override the family's default baud rate
    #[arg(long)]
    baud: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll one instrument and publish readings over zenoh
    Monitor {
        #[arg(long, value_enum)]
        device: DeviceKind,
        /// Seconds between polls [default: 5]
        #[arg(long = "period-secs", value_parser = positive_seconds)]
        period: Option<Duration>,
    },
    /// Send one raw command and print the reply
    Query {
        #[arg(long, value_enum)]
        device: DeviceKind,
        command: String,
        argument: Option<String>,
    },
    /// Move a stepper axis by a signed number of steps
    Move {
        #[arg(long)]
        axis: u8,
        #[arg(long, allow_hyphen_values = true)]
        steps: i64,
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long)]
        acceleration: Option<f64>,
        /// Run until a limit switch trips
        #[arg(long)]
        switch: bool,
        /// Extra seconds to wait past the computed move time [default: 3]
        #[arg(long = "buffer-secs", value_parser = non_negative_seconds)]
        buffer: Option<Duration>,
        /// Fail if the controller does not confirm the move in time
        #[arg(long)]
        strict: bool,
    },
    /// Drive a stepper axis onto its home switch
    Home {
        #[arg(long)]
        axis: u8,
    },
    /// Start or stop Cryotel cryocoolers, one per --port
    Cryocooler {
        #[command(subcommand)]
        action: CoolerAction,
    },
}

#[derive(Subcommand)]
enum CoolerAction {
    Start {
        /// One per port: power, temperature or off (first letter is enough)
        #[arg(long, value_delimiter = ',', default_value = "temperature")]
        modes: Vec<FleetMode>,
        /// W in power mode, K in temperature mode; keeps the current one if omitted
        #[arg(long)]
        setpoint: Option<f64>,
    },
    /// Stop every cooler
    Stop,
}

fn seconds(text: &str, allow_zero: bool) -> Result<Duration, String> {
    let value: f64 = text.parse().map_err(|e| format!("{:?} is not a number: {}", text, e))?;
    if value < 0.0 || (value == 0.0 && !allow_zero) {
        return Err(format!("{} must be {}", value, if allow_zero { "at least 0" } else { "above 0" }));
    }
    Duration::try_from_secs_f64(value).map_err(|e| format!("{} seconds is out of range: {}", value, e))
}

fn positive_seconds(text: &str) -> Result<Duration, String> {
    seconds(text, false)
}

fn non_negative_seconds(text: &str) -> Result<Duration, String> {
    seconds(text, true)
}

fn open(link: &Link, mut settings: SerialSettings) -> RuntimeResult<Box<dyn Transport>> {
    if let Some(baud) = link.baud {
        settings.baud_rate = baud;
    }
    match (link.port.as_slice(), &link.tcp) {
        ([port], _) => open_serial(port, &settings),
        ([], Some(addr)) => {
            info!("Connecting to {}", addr);
            Ok(Box::new(TcpTransport::connect(addr.as_str(), DEFAULT_READ_TIMEOUT)?))
        }
        ([], None) => Err("either --port or --tcp is required".into()),
        (ports, _) => Err(format!("this command takes one --port, got {}", ports.len()).into()),
    }
}

fn open_serial(port: &str, settings: &SerialSettings) -> RuntimeResult<Box<dyn Transport>> {
    info!("Opening {} at {} baud", port, settings.baud_rate);
    Ok(Box::new(SerialTransport::open(port, settings)?))
}

/// One cryocooler per port, or the single TCP link
fn connect_coolers(link: &Link) -> RuntimeResult<Vec<CryotelAvc<Box<dyn Transport>>>> {
    if link.port.is_empty() {
        return Ok(vec![CryotelAvc::connect(open(link, cryotel::serial_settings())?)?]);
    }
    let mut settings = cryotel::serial_settings();
    if let Some(baud) = link.baud {
        settings.baud_rate = baud;
    }
    link.port
        .iter()
        .map(|port| -> RuntimeResult<CryotelAvc<Box<dyn Transport>>> {
            Ok(CryotelAvc::connect(open_serial(port, &settings)?)?)
        })
        .collect()
}

async fn execute(cli: Cli) -> RuntimeResult<()> {
    match cli.command {
        Command::Monitor { device, period } => {
            let transport = open(&cli.link, device.serial_settings())?;
            let instrument: Arc<dyn Housekeeping> = Arc::from(device.connect(transport)?);
            runtime::run(instrument, period.unwrap_or(POLL_PERIOD)).await
        }
        Command::Query {
            device,
            command,
            argument,
        } => {
            let transport = open(&cli.link, device.serial_settings())?;
            let instrument = device.connect(transport)?;
            let response = instrument.query(&command, argument.as_deref())?;
            println!("{}", response.text());
            Ok(())
        }
        Command::Move {
            axis,
            steps,
            speed,
            acceleration,
            switch,
            buffer,
            strict,
        } => {
            let defaults = MoveOptions::default();
            let options = MoveOptions {
                speed: speed.unwrap_or(defaults.speed),
                acceleration: acceleration.unwrap_or(defaults.acceleration),
                buffer_time: buffer.unwrap_or(MOVE_BUFFER_TIME),
                strict,
            };
            let move_type = if switch { MoveType::SwitchSeeking } else { MoveType::Relative };
            let controller = MotorController::connect(open(&cli.link, motor::serial_settings())?)?;
            let result = controller.move_axis(axis, steps, move_type, &options)?;
            println!(
                "axis {}: confirmed {} steps, position {}{}",
                axis,
                result.confirmed_step_count,
                result.new_position,
                if result.complete { "" } else { " (not confirmed, may still be moving)" }
            );
            Ok(())
        }
        Command::Home { axis } => {
            let controller = MotorController::connect(open(&cli.link, motor::serial_settings())?)?;
            let result = controller.home(axis)?;
            println!("axis {}: homed={} position {}", axis, result.complete, result.new_position);
            Ok(())
        }
        Command::Cryocooler { action } => {
            let coolers = connect_coolers(&cli.link)?;
            let states = match action {
                CoolerAction::Start { modes, setpoint } => cryotel::start_coolers(&coolers, &modes, setpoint)?,
                CoolerAction::Stop => cryotel::stop_coolers(&coolers)?.into_iter().map(Some).collect(),
            };
            for (index, state) in states.iter().enumerate() {
                println!("cooler {}: {}", index + 1, state.as_deref().unwrap_or("left off"));
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = execute(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_validation() {
        assert_eq!(positive_seconds("2.5").unwrap(), Duration::from_millis(2500));
        assert!(positive_seconds("0").is_err());
        assert!(positive_seconds("-1").is_err());
        assert!(positive_seconds("NaN").is_err());
        assert!(positive_seconds("inf").is_err());
        assert!(positive_seconds("1e300").is_err());
        assert_eq!(non_negative_seconds("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_cryocooler_fleet_arguments() {
        let cli = Cli::try_parse_from([
            "housekeeping",
            "--port",
            "/dev/ttyUSB0,/dev/ttyUSB1,/dev/ttyUSB2",
            "cryocooler",
            "start",
            "--modes",
            "t,off,p",
        ])
        .unwrap();
        assert_eq!(cli.link.port.len(), 3);
        match cli.command {
            Command::Cryocooler {
                action: CoolerAction::Start { modes, .. },
            } => assert_eq!(modes[1], FleetMode::Off),
            _ => panic!("expected cryocooler start"),
        }
    }

    #[test]
    fn test_monitor_rejects_zero_period() {
        let parsed = Cli::try_parse_from([
            "housekeeping",
            "--port",
            "/dev/ttyUSB0",
            "monitor",
            "--device",
            "cryotel",
            "--period-secs",
            "0",
        ]);
        assert!(parsed.is_err());
    }
}
