//!
//! Host-side driver for a microcontroller-resident stepper-motor controller,
//! talking a length-framed, byte-oriented serial protocol. See the `driver`
//! module's [`MotorDriver`] for the public command surface.
//!

pub mod config;
pub mod driver;
pub mod error;
pub mod feedback;
pub mod job;
pub mod motion;
pub mod protocol;
pub mod router;
pub mod transport;

pub use config::Config;
pub use driver::{MotorDriver, RampParams};
pub use error::DriverError;
pub use feedback::FeedbackSnapshot;
pub use protocol::Direction;
pub use transport::WhoAmIProbe;
