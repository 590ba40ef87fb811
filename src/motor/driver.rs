// Stepper motor controller: motion planning and position tracking
//
// The controller has no position query, so the position tracked here is the
// only record of where each axis is. It changes only when the controller
// confirms steps, and it lives under the same lock as the serial traffic.

use std::collections::HashMap;
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::kinematics::Kinematics;
use crate::config::{
    DEFAULT_ACCELERATION, DEFAULT_SPEED, HOME_SEEK_STEPS, MOTOR_CONNECT_SETTLE, MOTOR_END_TOKENS,
    MOVE_BUFFER_TIME,
};
use crate::instrument::{
    ArgumentStyle, CommandSet, CommandSpec, DeviceProfile, Exchange, Identity, Instrument,
    InstrumentError, ResponseMode, Result, SentinelOutcome, Terminator,
};
use crate::transport::{SerialSettings, Transport};

/// Commands understood by the stepper controller firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCommand {
    /// `M<axis>1<dir><type><steps>:<speed>:<acceleration>`
    Move,
}

impl CommandSet for MotorCommand {
    const ALL: &'static [Self] = &[MotorCommand::Move];

    fn spec(self) -> CommandSpec {
        match self {
            MotorCommand::Move => CommandSpec::new("M", true, ResponseMode::UntilToken(MOTOR_END_TOKENS)),
        }
    }
}

/// Serial line settings of the controller board
pub fn serial_settings() -> SerialSettings {
    SerialSettings::eight_n_one(9600)
}

pub fn profile() -> DeviceProfile {
    DeviceProfile::new::<MotorCommand>("stepper", Terminator::Lf, ArgumentStyle::Inline)
}

/// Ordinary relative move, or a move that runs until a limit switch trips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    Relative,
    SwitchSeeking,
}

impl MoveType {
    fn code(self) -> char {
        match self {
            MoveType::Relative => 'R',
            MoveType::SwitchSeeking => 'S',
        }
    }
}

/// Tunables of a move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOptions {
    pub speed: f64,
    pub acceleration: f64,
    pub buffer_time: Duration,
    /// Fail with `IncompleteMove` instead of returning a partial result
    pub strict: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            acceleration: DEFAULT_ACCELERATION,
            buffer_time: MOVE_BUFFER_TIME,
            strict: false,
        }
    }
}

/// One move, fully specified
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub axis: u8,
    pub steps: i64,
    pub kinematics: Kinematics,
    pub move_type: MoveType,
    /// Read deadline: worst-case move time plus the buffer
    pub timeout: Duration,
}

impl MoveRequest {
    pub fn new(axis: u8, steps: i64, move_type: MoveType, options: &MoveOptions) -> Result<Self> {
        let kinematics = Kinematics::new(options.speed, options.acceleration)?;
        Ok(Self {
            axis,
            steps,
            kinematics,
            move_type,
            timeout: kinematics.move_timeout(steps.unsigned_abs(), options.buffer_time)?,
        })
    }

    /// +1 for non-negative requests, -1 otherwise
    pub fn direction(&self) -> i64 {
        if self.steps < 0 { -1 } else { 1 }
    }

    /// Wire command, e.g. `M01+R1000:100:100`
    pub fn command(&self) -> String {
        format!("{}{}", MotorCommand::Move.name(), self.argument())
    }

    /// Everything after the `M`, e.g. `01+R1000:100:100`
    pub fn argument(&self) -> String {
        format!(
            "{}1{}{}{}:{}:{}",
            self.axis,
            if self.direction() < 0 { '-' } else { '+' },
            self.move_type.code(),
            self.steps.unsigned_abs(),
            self.kinematics.speed,
            self.kinematics.acceleration
        )
    }
}

/// What a move did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    /// Device-confirmed steps, signed by the requested direction
    pub confirmed_step_count: i64,
    pub new_position: i64,
    /// False when no end token arrived before the deadline
    pub complete: bool,
    pub response: Vec<String>,
}

/// Tracked position of every axis that has been referenced
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AxisPositions {
    positions: HashMap<u8, i64>,
}

impl AxisPositions {
    pub fn get(&self, axis: u8) -> i64 {
        self.positions.get(&axis).copied().unwrap_or(0)
    }

    fn entry(&mut self, axis: u8) -> &mut i64 {
        self.positions.entry(axis).or_insert(0)
    }

    /// Axes referenced so far with their positions, sorted by axis
    pub fn snapshot(&self) -> Vec<(u8, i64)> {
        let mut axes: Vec<_> = self.positions.iter().map(|(&a, &p)| (a, p)).collect();
        axes.sort_unstable();
        axes
    }
}

/// Confirmed magnitude from the `EOR:<steps>` line, if the move finished
///
/// A `com_fail` end line means the controller gave up on the move.
pub fn parse_confirmed_steps(outcome: &SentinelOutcome) -> Result<Option<u64>> {
    let Some(line) = outcome.sentinel_line() else {
        return Ok(None);
    };
    if !line.starts_with("EOR") {
        return Err(InstrumentError::Device {
            message: "motor controller reported a communication failure".to_string(),
            code: line.to_string(),
        });
    }
    let field = line.rsplit(':').next().unwrap_or_default().trim();
    field
        .parse::<u64>()
        .map(Some)
        .map_err(|e| InstrumentError::invalid_response(line, format!("bad step count {:?}: {}", field, e)))
}

/// Multi-axis stepper controller with position bookkeeping
pub struct MotorController<T: Transport> {
    instrument: Instrument<T, AxisPositions>,
    options: MoveOptions,
}

impl<T: Transport> MotorController<T> {
    /// Wrap a transport without any I/O
    pub fn new(transport: T) -> Self {
        Self {
            instrument: Instrument::with_state(transport, profile(), AxisPositions::default()),
            options: MoveOptions::default(),
        }
    }

    /// Wrap a transport, handshake, and wait for the board to boot
    pub fn connect(transport: T) -> Result<Self> {
        let controller = Self::new(transport);
        controller.instrument.handshake()?;
        info!("Waiting {:?} for motor controller to settle", MOTOR_CONNECT_SETTLE);
        sleep(MOTOR_CONNECT_SETTLE);
        Ok(controller)
    }

    pub fn with_options(mut self, options: MoveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &MoveOptions {
        &self.options
    }

    pub fn identity(&self) -> Identity {
        self.instrument.identity()
    }

    /// Tracked position of an axis (0 until the axis first moves)
    pub fn position(&self, axis: u8) -> i64 {
        *self.instrument.lock().state_mut().entry(axis)
    }

    pub fn positions(&self) -> Vec<(u8, i64)> {
        self.instrument.read_state(AxisPositions::snapshot)
    }

    /// Move `steps` steps relative to the current position
    pub fn relative_move(&self, axis: u8, steps: i64) -> Result<MoveResult> {
        self.move_axis(axis, steps, MoveType::Relative, &self.options)
    }

    /// General move with explicit kinematics
    pub fn move_axis(&self, axis: u8, steps: i64, move_type: MoveType, options: &MoveOptions) -> Result<MoveResult> {
        let request = MoveRequest::new(axis, steps, move_type, options)?;
        let mut exchange = self.instrument.lock();
        execute(&mut exchange, &request, options.strict)
    }

    /// Move to `target` using the tracked position as the origin
    pub fn absolute_move(&self, axis: u8, target: i64) -> Result<MoveResult> {
        let mut exchange = self.instrument.lock();
        let position = *exchange.state_mut().entry(axis);
        let delta = target.checked_sub(position).ok_or_else(|| {
            InstrumentError::invalid_response(
                MotorCommand::Move.name(),
                format!("axis {} cannot reach {} from {}", axis, target, position),
            )
        })?;
        let request = MoveRequest::new(axis, delta, MoveType::Relative, &self.options)?;
        execute(&mut exchange, &request, self.options.strict)
    }

    /// Drive onto the home switch and define that point as 0
    pub fn home(&self, axis: u8) -> Result<MoveResult> {
        let request = MoveRequest::new(axis, -HOME_SEEK_STEPS, MoveType::SwitchSeeking, &self.options)?;
        let mut exchange = self.instrument.lock();
        let mut result = execute(&mut exchange, &request, self.options.strict)?;
        if result.complete {
            info!(
                "Axis {} homed after {} confirmed steps",
                axis, result.confirmed_step_count
            );
            *exchange.state_mut().entry(axis) = 0;
            result.new_position = 0;
        }
        Ok(result)
    }
}

fn execute<T: Transport>(
    exchange: &mut Exchange<'_, T, AxisPositions>,
    request: &MoveRequest,
    strict: bool,
) -> Result<MoveResult> {
    let timeout = request.timeout;
    debug!("Axis {} move {:?}, timeout {:?}", request.axis, request, timeout);

    let outcome = exchange.query_until_token(MotorCommand::Move.name(), Some(&request.argument()), timeout)?;
    let previous = *exchange.state_mut().entry(request.axis);

    match parse_confirmed_steps(&outcome)? {
        Some(confirmed) => {
            let new_position = i64::try_from(confirmed)
                .ok()
                .map(|confirmed| request.direction() * confirmed)
                .and_then(|delta| previous.checked_add(delta).map(|position| (delta, position)));
            let Some((confirmed_step_count, new_position)) = new_position else {
                return Err(InstrumentError::invalid_response(
                    &request.command(),
                    format!("confirmed {} steps from {} overflows the position", confirmed, previous),
                ));
            };
            *exchange.state_mut().entry(request.axis) = new_position;
            if confirmed != request.steps.unsigned_abs() {
                warn!(
                    "Axis {} confirmed {} of {} requested steps",
                    request.axis,
                    confirmed,
                    request.steps.unsigned_abs()
                );
            }
            info!("Axis {} moved {} steps, now at {}", request.axis, confirmed_step_count, new_position);
            Ok(MoveResult {
                confirmed_step_count,
                new_position,
                complete: true,
                response: outcome.lines,
            })
        }
        None if strict => Err(InstrumentError::IncompleteMove {
            axis: request.axis,
            timeout,
            partial: outcome.lines,
        }),
        None => {
            warn!(
                "Axis {} move not confirmed within {:?}, axis may still be moving",
                request.axis, timeout
            );
            Ok(MoveResult {
                confirmed_step_count: 0,
                new_position: previous,
                complete: false,
                response: outcome.lines,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::sentinel::SentinelReader;
    use crate::transport::MockTransport;

    fn controller(mock: &MockTransport) -> MotorController<MockTransport> {
        MotorController::new(mock.clone())
    }

    fn fast_options() -> MoveOptions {
        MoveOptions {
            speed: 1_000_000.0,
            acceleration: 1_000_000.0,
            buffer_time: Duration::from_millis(20),
            strict: false,
        }
    }

    #[test]
    fn test_move_command_format() {
        let options = MoveOptions::default();
        let forward = MoveRequest::new(0, 1000, MoveType::Relative, &options).unwrap();
        assert_eq!(forward.command(), "M01+R1000:100:100");

        let home = MoveRequest::new(2, -HOME_SEEK_STEPS, MoveType::SwitchSeeking, &options).unwrap();
        assert_eq!(home.command(), "M21-S100000:100:100");

        let zero = MoveRequest::new(1, 0, MoveType::Relative, &options).unwrap();
        assert_eq!(zero.command(), "M11+R0:100:100");
    }

    #[test]
    fn test_move_timeout_from_kinematics() {
        let request = MoveRequest::new(0, 1000, MoveType::Relative, &MoveOptions::default()).unwrap();
        assert_eq!(request.timeout, Duration::from_secs(14));
        assert_eq!(request.argument(), "01+R1000:100:100");
    }

    #[test]
    fn test_unbounded_move_time_sends_nothing() {
        let mock = MockTransport::new();
        let motors = controller(&mock);
        let options = MoveOptions {
            speed: 1.0,
            acceleration: 1e-40,
            ..MoveOptions::default()
        };
        assert!(matches!(
            motors.move_axis(0, 1000, MoveType::Relative, &options),
            Err(InstrumentError::InvalidKinematics { .. })
        ));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_move_resolves_through_command_table() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:10\nOK\n");
        let instrument = Instrument::new(mock.clone(), profile());

        let response = instrument.query("M01+R10:100:100", None).unwrap();
        assert_eq!(response.lines, vec!["EOR:10", "OK"]);
        assert_eq!(mock.written_text(), vec!["M01+R10:100:100\n"]);
    }

    #[test]
    fn test_position_overflow_is_rejected() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:5\nOK\n");
        let motors = controller(&mock);
        motors.relative_move(0, 5).unwrap();

        assert!(matches!(
            motors.absolute_move(0, i64::MIN),
            Err(InstrumentError::InvalidResponse { .. })
        ));
        assert_eq!(motors.position(0), 5);
        assert_eq!(mock.written().len(), 1);

        mock.queue_reply(format!("EOR:{}\nOK\n", u64::MAX));
        assert!(motors.relative_move(0, 5).is_err());
        assert_eq!(motors.position(0), 5);
    }

    #[test]
    fn test_confirmed_count_wins_over_requested() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:950\nOK\n");
        let motors = controller(&mock);

        let result = motors.relative_move(0, 1000).unwrap();
        assert_eq!(mock.written_text(), vec!["M01+R1000:100:100\n"]);
        assert_eq!(result.confirmed_step_count, 950);
        assert_eq!(result.new_position, 950);
        assert!(result.complete);
        assert_eq!(motors.position(0), 950);
    }

    #[test]
    fn test_negative_move_uses_requested_sign() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:1000\nOK\n").queue_reply(b"EOR:300\nOK\n");
        let motors = controller(&mock);

        motors.relative_move(1, 1000).unwrap();
        let result = motors.relative_move(1, -300).unwrap();
        assert_eq!(result.confirmed_step_count, -300);
        assert_eq!(motors.position(1), 700);
        assert_eq!(mock.written_text()[1], "M11-R300:100:100\n");
    }

    #[test]
    fn test_absolute_move_twice_is_noop_second_time() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:500\nOK\n").queue_reply(b"EOR:0\nOK\n");
        let motors = controller(&mock);

        motors.absolute_move(3, 500).unwrap();
        motors.absolute_move(3, 500).unwrap();
        let frames = mock.written_text();
        assert_eq!(frames[0], "M31+R500:100:100\n");
        assert_eq!(frames[1], "M31+R0:100:100\n");
        assert_eq!(motors.position(3), 500);
    }

    #[test]
    fn test_home_forces_zero() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:400\nOK\n").queue_reply(b"EOR:123\nhome\n");
        let motors = controller(&mock);

        motors.relative_move(2, 400).unwrap();
        let result = motors.home(2).unwrap();
        assert_eq!(result.new_position, 0);
        assert_eq!(motors.position(2), 0);
        assert!(mock.written_text()[1].starts_with("M21-S100000:"));
    }

    #[test]
    fn test_progress_lines_before_end_token() {
        let mock = MockTransport::new();
        mock.queue_reply(b"moving\r\nstep 500\r\nEOR:1000\r\nOK\r\n");
        let motors = controller(&mock);

        let result = motors.relative_move(0, 1000).unwrap();
        assert_eq!(result.response, vec!["moving", "step 500", "EOR:1000", "OK"]);
        assert_eq!(motors.position(0), 1000);
    }

    #[test]
    fn test_incomplete_move_keeps_position() {
        let mock = MockTransport::new();
        mock.queue_reply(b"moving\n");
        let motors = controller(&mock).with_options(fast_options());

        let result = motors.relative_move(0, 10).unwrap();
        assert!(!result.complete);
        assert_eq!(result.confirmed_step_count, 0);
        assert_eq!(result.response, vec!["moving"]);
        assert_eq!(motors.position(0), 0);
    }

    #[test]
    fn test_incomplete_move_strict() {
        let mock = MockTransport::new();
        mock.queue_reply(b"moving\n");
        let options = MoveOptions {
            strict: true,
            ..fast_options()
        };
        let motors = controller(&mock).with_options(options);

        match motors.relative_move(4, 10) {
            Err(InstrumentError::IncompleteMove { axis, partial, .. }) => {
                assert_eq!(axis, 4);
                assert_eq!(partial, vec!["moving"]);
            }
            other => panic!("expected IncompleteMove, got {:?}", other),
        }
        assert_eq!(motors.position(4), 0);
    }

    #[test]
    fn test_incomplete_home_keeps_position() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:40\nOK\n");
        let motors = controller(&mock).with_options(fast_options());
        motors.relative_move(0, 40).unwrap();

        let result = motors.home(0).unwrap();
        assert!(!result.complete);
        assert_eq!(motors.position(0), 40);
    }

    #[test]
    fn test_com_fail_is_device_error() {
        let mock = MockTransport::new();
        mock.queue_reply(b"com_fail\nOK\n");
        let motors = controller(&mock);
        assert!(matches!(
            motors.relative_move(0, 10),
            Err(InstrumentError::Device { .. })
        ));
        assert_eq!(motors.position(0), 0);
    }

    #[test]
    fn test_invalid_kinematics_sends_nothing() {
        let mock = MockTransport::new();
        let motors = controller(&mock);
        let options = MoveOptions {
            speed: 0.0,
            ..MoveOptions::default()
        };
        assert!(matches!(
            motors.move_axis(0, 10, MoveType::Relative, &options),
            Err(InstrumentError::InvalidKinematics { .. })
        ));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_parse_confirmed_steps() {
        let mut reader = SentinelReader::new(MOTOR_END_TOKENS);
        reader.push_line("EOR:abc");
        assert!(parse_confirmed_steps(&reader.finish()).is_err());

        let reader = SentinelReader::new(MOTOR_END_TOKENS);
        assert_eq!(parse_confirmed_steps(&reader.finish()).unwrap(), None);
    }

    #[test]
    fn test_positions_snapshot() {
        let mock = MockTransport::new();
        mock.queue_reply(b"EOR:5\nOK\n");
        let motors = controller(&mock);
        assert_eq!(motors.position(1), 0);
        motors.relative_move(0, 5).unwrap();
        assert_eq!(motors.positions(), vec![(0, 5), (1, 0)]);
    }
}
