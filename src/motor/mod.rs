// Stepper motor control
//
// Provides:
// - Trapezoidal/triangular move-time model used to bound move reads
// - Multi-axis controller with relative, absolute and homing moves
// - Position bookkeeping from device-confirmed step counts

mod driver;
pub mod kinematics;

pub use driver::{
    parse_confirmed_steps, profile, serial_settings, AxisPositions, MotorCommand, MotorController, MoveOptions,
    MoveRequest, MoveResult, MoveType,
};
pub use kinematics::{derive_timeout, Kinematics};
