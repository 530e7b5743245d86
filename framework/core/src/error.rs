use core::fmt;

/// The closed error set of the track-signal core.
///
/// Reply-side conditions (timeouts, collisions) are part of the same
/// taxonomy so callbacks and operations report through one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No decoder answered on the programming track.
    NoDecoder,
    /// The decoder does not implement the requested CV.
    CvUnsupported,
    /// Verify found a different value than expected.
    CvCompareFailed,
    CvWriteFailed,
    Short,
    /// Base current would not settle before the programming sequence.
    UnstableBaseCurrent,
    /// The operation was aborted by a track-mode change.
    Interrupted,
    Internal,
    Timeout,
    NoAnswer,
    ReadError,
    Collision,
    Nack,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoDecoder => write!(f, "no decoder"),
            Self::CvUnsupported => write!(f, "CV unsupported"),
            Self::CvCompareFailed => write!(f, "CV compare failed"),
            Self::CvWriteFailed => write!(f, "CV write failed"),
            Self::Short => write!(f, "short circuit"),
            Self::UnstableBaseCurrent => write!(f, "unstable base current"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Internal => write!(f, "internal error"),
            Self::Timeout => write!(f, "timeout"),
            Self::NoAnswer => write!(f, "no answer"),
            Self::ReadError => write!(f, "read error"),
            Self::Collision => write!(f, "collision"),
            Self::Nack => write!(f, "negative acknowledge"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
