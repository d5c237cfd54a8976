//! The device actor's session state machine (spec §4.4).

use crate::error::MtpError;

/// States of a single device session, per the spec's state diagram:
/// `Closed -> Opening -> Ready -> Closing -> Closed`, with `Opening`/`Ready`
/// able to fall into the terminal `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorState {
    Closed,
    Opening,
    Ready,
    Closing,
    Failed(MtpError),
}

impl ActorState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
