// Timeouts, topics, protocol constants
use std::time::Duration;

// Runtime loop frequency (housekeeping readings are slow-changing)
pub const POLL_PERIOD: Duration = Duration::from_secs(5);

// Zenoh topic prefix; readings go to <prefix>/<instrument>/reading
pub const TOPIC_PREFIX: &str = "housekeeping";

// Per-line read timeout used when a profile doesn't override it
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

// Wait between the connect line break and flushing stale input
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(100);

// Wait before draining a variable-length block (cryocooler STATUS)
pub const STATUS_SETTLE_DELAY: Duration = Duration::from_secs(1);

// Header lines preceding `key = value` pairs in a STATUS block
pub const STATUS_HEADER_LINES: usize = 2;

// Motor controllers reset when the port opens and need time to boot
pub const MOTOR_CONNECT_SETTLE: Duration = Duration::from_secs(5);

// Safety margin added to the kinematic move time
pub const MOVE_BUFFER_TIME: Duration = Duration::from_secs(3);

// Default motor kinematics (steps/s, steps/s^2)
pub const DEFAULT_SPEED: f64 = 100.0;
pub const DEFAULT_ACCELERATION: f64 = 100.0;

// Step count used to drive an axis onto its home switch
pub const HOME_SEEK_STEPS: i64 = 100_000;

// Motor controller end-of-response markers
pub const MOTOR_END_TOKENS: &[&str] = &["EOR", "com_fail"];
