use thiserror::Error;

///
/// All errors emitted while decoding a single already-framed payload
/// (the bytes between STX+length and the trailing ETX, inclusive of ETX).
/// Every variant here is a soft error: the caller drops the frame and
/// resynchronises on the next STX, per spec.
///
/// - `TooShort`: fewer than 3 bytes total were framed (`length < 3`)
/// - `BadEtx`: the final byte of the payload was not the configured ETX
/// - `UnknownMessageId`: the first payload byte did not match any configured message id
/// - `UnexpectedLength`: the payload length did not match the variant implied by its message id
///
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("framed record shorter than the minimum of 3 bytes")]
    TooShort,

    #[error("frame did not end with ETX, got {0:#04x}")]
    BadEtx(u8),

    #[error("unrecognised message id {0:#04x}")]
    UnknownMessageId(u8),

    #[error("payload length {got} does not match the {expected} bytes expected for message id {message_id:#04x}")]
    UnexpectedLength { message_id: u8, expected: usize, got: usize },
}
