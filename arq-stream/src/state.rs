//! Connection finite-state machine (FSM) types and transition table.
//!
//! The lifecycle is deliberately small:
//!
//! ```text
//!            open               handshake done         close(graceful)
//!  CLOSED ─────────▶ NEGOTIATING ─────────────▶ OPEN ─────────────────▶ CLOSING
//!    ▲                    │                      │  ╲ close(abort) /        │
//!    │                    │ fatal                │   ╲ peer reset           │ drained
//!    │                    ▼                      │    ╲                     │
//!    └──── cleanup ──── ERROR ◀──── fatal ───────┘     ╲──────────▶ CLOSED ◀┘
//! ```
//!
//! [`transition`] is a pure function of `(state, input)`.  It decides the
//! next state and names the [`Action`] the connection must carry out; the
//! action's side effects (sending segments, tearing down engines) live in
//! [`crate::connection`].  Keeping the table here makes every legal and
//! illegal transition testable without any I/O.

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Closed,
    /// Handshake in progress: SYN sent, or waiting for one.
    Negotiating,
    /// Parameters agreed; data transfer in progress.
    Open,
    /// Graceful close: draining the window, then sending the close segment.
    Closing,
    /// Unrecoverable failure; cleanup runs and the state falls to `Closed`.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Stimulus applied to the FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Open,
    HandshakeComplete,
    Close { graceful: bool },
    PeerReset,
    /// Window drained and the close segment acknowledged (or given up on).
    Drained,
    Fatal,
    CleanupComplete,
}

/// Side effect the connection performs for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do; the input is a legal no-op in this state.
    None,
    StartHandshake,
    /// Build the Tx/Rx engines from the negotiated parameters.
    Activate,
    /// Remember the close request until negotiation settles.
    QueueClose,
    BeginDrain,
    /// Send a reset and discard all window state.
    Abort,
    /// Release engines and timers after an orderly end.
    Teardown,
    /// Release everything and record the failure.
    Fail,
    Recover,
    /// The input is not allowed in this state.
    Reject,
}

/// The transition table.
pub fn transition(state: ConnectionState, input: Input) -> (ConnectionState, Action) {
    use ConnectionState::*;

    match (state, input) {
        (Closed, Input::Open) => (Negotiating, Action::StartHandshake),
        (Negotiating, Input::HandshakeComplete) => (Open, Action::Activate),

        (Negotiating, Input::Close { .. }) => (Negotiating, Action::QueueClose),
        (Open, Input::Close { graceful: true }) => (Closing, Action::BeginDrain),
        (Open | Closing, Input::Close { graceful: false }) => (Closed, Action::Abort),
        (Closing, Input::Close { graceful: true }) => (Closing, Action::None),
        (Closed, Input::Close { .. }) => (Closed, Action::None),

        (Open | Closing, Input::PeerReset) => (Closed, Action::Teardown),
        (Closing, Input::Drained) => (Closed, Action::Teardown),

        (Negotiating | Open | Closing, Input::Fatal) => (Error, Action::Fail),
        (Error, Input::CleanupComplete) => (Closed, Action::Recover),

        (s, _) => (s, Action::Reject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn happy_path() {
        assert_eq!(transition(Closed, Input::Open), (Negotiating, Action::StartHandshake));
        assert_eq!(
            transition(Negotiating, Input::HandshakeComplete),
            (Open, Action::Activate)
        );
        assert_eq!(
            transition(Open, Input::Close { graceful: true }),
            (Closing, Action::BeginDrain)
        );
        assert_eq!(transition(Closing, Input::Drained), (Closed, Action::Teardown));
    }

    #[test]
    fn close_during_negotiation_is_queued() {
        assert_eq!(
            transition(Negotiating, Input::Close { graceful: false }),
            (Negotiating, Action::QueueClose)
        );
    }

    #[test]
    fn abort_from_open_or_closing() {
        for s in [Open, Closing] {
            assert_eq!(
                transition(s, Input::Close { graceful: false }),
                (Closed, Action::Abort)
            );
        }
    }

    #[test]
    fn fatal_reaches_error_then_closed() {
        for s in [Negotiating, Open, Closing] {
            assert_eq!(transition(s, Input::Fatal), (Error, Action::Fail));
        }
        assert_eq!(
            transition(Error, Input::CleanupComplete),
            (Closed, Action::Recover)
        );
    }

    #[test]
    fn illegal_inputs_rejected() {
        assert_eq!(transition(Open, Input::Open), (Open, Action::Reject));
        assert_eq!(transition(Closed, Input::Fatal), (Closed, Action::Reject));
        assert_eq!(
            transition(Closed, Input::HandshakeComplete),
            (Closed, Action::Reject)
        );
    }

    #[test]
    fn close_when_closed_is_noop() {
        assert_eq!(
            transition(Closed, Input::Close { graceful: true }),
            (Closed, Action::None)
        );
    }
}
