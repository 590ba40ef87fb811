// Instrument diagnostic: READ-ONLY session against one housekeeping instrument
//
// Only identity and reading queries are sent; no setpoints are changed.
//
// Usage: cargo run --example instrument_diagnostic -- <device> [port]
// Example: cargo run --example instrument_diagnostic -- lakeshore218 /dev/ttyUSB0

use clap::ValueEnum;
use housekeeping::devices::DeviceKind;
use housekeeping::transport::SerialTransport;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let device_name = args.next().unwrap_or_else(|| "lakeshore218".to_string());
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let kind = DeviceKind::from_str(&device_name, true)?;
    let settings = kind.serial_settings();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Housekeeping Instrument Diagnostic                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Identity and readings only - no settings are written        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Device:      {:?}", kind);
    println!("Serial port: {}", port);
    println!(
        "Line:        {} baud, {} data bits, {:?} parity, {} stop bits",
        settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits
    );
    println!();

    println!("Step 1: Opening serial port...");
    let transport = match SerialTransport::open(&port, &settings) {
        Ok(transport) => {
            println!("  ✓ Serial port opened successfully");
            transport
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB-serial adapter is connected");
            println!("  - Check the instrument's baud rate matches {}", settings.baud_rate);
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Handshake...");
    let instrument = match kind.connect(transport) {
        Ok(instrument) => {
            println!("  ✓ Connected to {}", instrument.name());
            instrument
        }
        Err(e) => {
            println!("  ✗ Handshake failed: {}", e);
            return Err(e.into());
        }
    };
    println!();

    println!("Step 3: Identity...");
    let identity = instrument.identity();
    println!("    Model:    {}", identity.model_number);
    println!("    Serial:   {}", identity.serial_number);
    println!("    Firmware: {}", identity.firmware_version);
    if identity.serial_string == "xxxx/xxxx" {
        println!("  ⚠ No identity reported (placeholders shown)");
    }
    println!();

    println!("Step 4: Reading housekeeping values...");
    match instrument.log_dict() {
        Ok(readings) => {
            for (name, value) in &readings {
                println!("    {:<32} {}", name, value);
            }
            println!("  ✓ {} values read", readings.len());
        }
        Err(e) => {
            println!("  ✗ Reading failed: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Timeouts usually mean wrong baud rate, parity or terminator");
            println!("  - Device errors are reported by the instrument itself");
            return Err(e.into());
        }
    }
    println!();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Next step: cargo run -- --port {} monitor --device {}", port, device_name);

    Ok(())
}
