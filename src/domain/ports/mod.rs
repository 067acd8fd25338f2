//! Ports: seams between the engines and their environment.

pub mod clock;

pub use clock::{system_clock, Clock, SystemClock};
