use serde::Serialize;
use std::fmt;

/// Bootstrap progress of the [`StateStore`](super::StateStore).
///
/// Moves `Uninitialized -> Loading -> Ready | Degraded`. Going back to
/// `Loading` only happens through an explicit reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Uninitialized,
    Loading,
    /// Snapshot came from the remote store, or the remote was empty and
    /// defaults were seeded.
    Ready,
    /// Remote read failed; running on in-memory defaults that were not
    /// written back.
    Degraded,
}

impl ReadinessState {
    /// Ready or Degraded: the snapshot may be read and mutated.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    pub fn can_transition_to(self, next: ReadinessState, explicit_reset: bool) -> bool {
        use ReadinessState::*;
        match (self, next) {
            (Uninitialized, Loading) => true,
            (Loading, Ready | Degraded) => true,
            (Ready | Degraded, Loading) => explicit_reset,
            _ => false,
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}
