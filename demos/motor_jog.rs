// Keyboard jog: A/D step the axis, 0-9 select axis, R/F step size, H home, Q quit
//
// Usage: cargo run --example motor_jog -- [port]
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use housekeeping::instrument::InstrumentError;
use housekeeping::motor::{self, MotorController, MoveResult};
use housekeeping::transport::{SerialTransport, Transport};
use std::time::Duration;
use tracing::{info, warn};

const STEP_SIZES: [i64; 4] = [10, 100, 1000, 10000];

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyACM0".to_string());

    info!("Opening {} and waiting for the controller to boot...", port);
    let transport = SerialTransport::open(&port, &motor::serial_settings())?;
    let controller = MotorController::connect(transport)?;

    info!("Controls: A/D=jog, 0-9=axis, R/F=step size, H=home, Q=quit");
    info!("Axis 0, step {}", STEP_SIZES[0]);

    enable_raw_mode()?;
    let result = run_jog(&controller);
    disable_raw_mode()?;

    result
}

fn run_jog<T: Transport>(controller: &MotorController<T>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut axis: u8 = 0;
    let mut step_idx: usize = 0;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        match code {
            // Moves block until the controller confirms or the timeout passes
            KeyCode::Char('a') => report(axis, controller.relative_move(axis, -STEP_SIZES[step_idx])),
            KeyCode::Char('d') => report(axis, controller.relative_move(axis, STEP_SIZES[step_idx])),
            KeyCode::Char('h') => report(axis, controller.home(axis)),

            KeyCode::Char(c @ '0'..='9') => {
                axis = c as u8 - b'0';
                info!("Axis {}, position {}", axis, controller.position(axis));
            }

            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEP_SIZES.len() - 1);
                info!("Step {}", STEP_SIZES[step_idx]);
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                info!("Step {}", STEP_SIZES[step_idx]);
            }

            KeyCode::Char('q') | KeyCode::Esc => break,

            _ => {}
        }
    }

    for (axis, position) in controller.positions() {
        info!("Final position axis {}: {}", axis, position);
    }
    Ok(())
}

fn report(axis: u8, result: Result<MoveResult, InstrumentError>) {
    match result {
        Ok(moved) if moved.complete => info!("Axis {} at {}", axis, moved.new_position),
        Ok(moved) => warn!("Axis {} unconfirmed, still at {}", axis, moved.new_position),
        Err(e) => warn!("Axis {} move failed: {}", axis, e),
    }
}
