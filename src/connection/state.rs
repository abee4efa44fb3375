//! Connection state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state (not connected)
    Initial,

    /// TLS negotiation in progress (SSLRequest sent, awaiting S/N response)
    NegotiatingTls,

    /// Startup sent, awaiting authentication request
    AwaitingAuth,

    /// Authentication in progress
    Authenticating,

    /// Idle (ready for query)
    Idle,

    /// Query sent, nothing read yet
    QueryInProgress,

    /// Reading query results
    ReadingResults,

    /// Server waits for COPY FROM STDIN data
    CopyIn,

    /// Server streams COPY TO STDOUT data
    CopyOut,

    /// Bidirectional copy
    CopyBoth,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, NegotiatingTls)
                | (Initial, AwaitingAuth)
                | (NegotiatingTls, AwaitingAuth)
                | (AwaitingAuth, Authenticating)
                | (Authenticating, Idle)
                | (Idle, QueryInProgress)
                | (QueryInProgress, ReadingResults)
                | (ReadingResults, Idle)
                | (ReadingResults, CopyIn)
                | (ReadingResults, CopyOut)
                | (ReadingResults, CopyBoth)
                | (CopyIn, ReadingResults)
                | (CopyOut, ReadingResults)
                | (CopyBoth, ReadingResults)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the server is in one of the COPY sub-protocol modes
    pub fn is_copy(&self) -> bool {
        matches!(self, Self::CopyIn | Self::CopyOut | Self::CopyBoth)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::AwaitingAuth => write!(f, "awaiting_auth"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Idle => write!(f, "idle"),
            Self::QueryInProgress => write!(f, "query_in_progress"),
            Self::ReadingResults => write!(f, "reading_results"),
            Self::CopyIn => write!(f, "copy_in"),
            Self::CopyOut => write!(f, "copy_out"),
            Self::CopyBoth => write!(f, "copy_both"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
