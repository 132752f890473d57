//! Tween engine error types

use thiserror::Error;

use crate::tween::TweenId;

/// Errors surfaced to the caller of the scheduler API
///
/// Faults raised inside user callbacks never show up here: they are logged
/// and resolved by stopping the offending tween.
#[derive(Error, Debug)]
pub enum TweenError {
    /// The id does not name a tween in the scheduler (never created or removed)
    #[error("Unknown tween: {0:?}")]
    UnknownTween(TweenId),

    /// A sequence operation was called on a tween that is not a sequence
    #[error("Tween {0:?} is not a sequence")]
    NotASequence(TweenId),

    /// Playing a sequence with no children
    #[error("Sequence {0:?} has no tweens to play")]
    EmptySequence(TweenId),

    /// The tween already belongs to a sequence
    #[error("Tween {tween:?} already belongs to sequence {sequence:?}")]
    AlreadySequenced { tween: TweenId, sequence: TweenId },

    /// A sequence cannot contain itself, directly or through a child sequence
    #[error("Sequence {sequence:?} cannot contain {tween:?}: it would contain itself")]
    SelfReference { sequence: TweenId, tween: TweenId },

    /// Timing parameters out of range
    #[error("Invalid tween timing: {0}")]
    InvalidTiming(String),

    /// Timing preset failed to parse
    #[error("Invalid tween configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, TweenError>;
