use thiserror::Error;

use crate::config::error::ConfigError;
use crate::job::error::JobError;
use crate::motion::error::MotionError;
use crate::protocol::error::FrameError;
use crate::transport::error::TransportError;

///
/// The crate's aggregate error type. Each variant is either `#[from]`-composed
/// out of a module's own error enum, or a driver-level condition that
/// doesn't belong to any single module (e.g. the outbound queue being full
/// for a control command outside the job lifecycle).
///
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Motion(#[from] MotionError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("outbound queue is full; command was not transmitted")]
    QueueFull,

    #[error("transport is not running")]
    NotConnected,
}
