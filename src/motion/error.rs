use thiserror::Error;

///
/// All errors emitted by the motion planner's numeric derivations.
///
/// - `NegativeRpm`: a requested RPM was negative
/// - `ZeroPulses`: the requested motion resolved to zero pulses
///
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum MotionError {
    #[error("requested RPM {0} is negative")]
    NegativeRpm(f64),

    #[error("requested motion resolves to zero pulses")]
    ZeroPulses,
}
