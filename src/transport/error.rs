use thiserror::Error;

///
/// All errors emitted by the physical serial transport: port discovery,
/// the connect-time identity probe, and steady-state I/O.
///
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no candidate serial port responded")]
    NoPortFound,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open serial port: {0}")]
    Open(#[from] serialport::Error),
}
