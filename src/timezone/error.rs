use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimezoneError {
    #[error("Timezone must not be empty")]
    Empty,

    #[error("Unknown timezone '{0}'")]
    UnknownZone(String),

    #[error("Malformed UTC offset '{0}', expected +HH:MM, -HHMM or +HH")]
    MalformedOffset(String),

    #[error("UTC offset '{0}' is out of range")]
    OffsetOutOfRange(String),
}
