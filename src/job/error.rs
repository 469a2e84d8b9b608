use thiserror::Error;

///
/// All errors emitted by the Job State Machine's submission path. Both are
/// synchronous, returned directly from `JobStateMachine::submit`.
///
/// - `NotIdle`: a motion job was already pending or active
/// - `QueueFull`: the outbound queue was saturated; the frame was never transmitted
///
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    #[error("a motion job is already pending or active")]
    NotIdle,

    #[error("outbound queue is full; frame was not transmitted")]
    QueueFull,
}
