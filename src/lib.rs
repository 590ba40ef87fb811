// Laboratory housekeeping: instrument drivers, stepper control, polling runtime

pub mod config;
pub mod devices;
pub mod instrument;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod transport;
