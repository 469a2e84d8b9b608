use thiserror::Error;

///
/// All errors emitted while resolving a raw `section -> name -> value` map
/// into a validated `Config`. These are hard errors: a `Config` is either
/// fully valid or it does not exist.
///
/// - `MissingSection`: a required top-level section was absent from the map
/// - `MissingKey`: a required key was absent from a present section
/// - `EmptyMicrostepSet`: the `motor_settings` microstep list had no entries
/// - `MicrostepSetNotSorted`: the microstep divisors were not strictly ascending
///
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration section `{section}`")]
    MissingSection { section: &'static str },

    #[error("missing configuration key `{section}.{key}`")]
    MissingKey { section: &'static str, key: &'static str },

    #[error("motor_settings microstep set must not be empty")]
    EmptyMicrostepSet,

    #[error("motor_settings microstep set must be sorted ascending, got {0:?}")]
    MicrostepSetNotSorted(Vec<u32>),
}
