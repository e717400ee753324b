use std::fmt::{Display, Formatter};

/// Error type for decoding, device setup and settings IO.
///
/// Playback requests never surface these to callers; they are logged and the
/// request becomes a no-op.
#[derive(Debug)]
pub enum CueError {
    Io(std::io::Error),
    Unsupported(String),
    NoTrack,
    Decode(String),
    Device(String),
    Settings(String),
}

impl Display for CueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Unsupported(err) => write!(f, "unsupported format: {}", err),
            Self::NoTrack => write!(f, "no decodable audio track"),
            Self::Decode(err) => write!(f, "decode error: {}", err),
            Self::Device(err) => write!(f, "device error: {}", err),
            Self::Settings(err) => write!(f, "invalid settings: {}", err),
        }
    }
}

impl std::error::Error for CueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CueError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<symphonia::core::errors::Error> for CueError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error;
        match value {
            Error::IoError(err) => Self::Io(err),
            Error::Unsupported(what) => Self::Unsupported(what.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CueError {
    fn from(value: serde_json::Error) -> Self {
        Self::Settings(value.to_string())
    }
}
