use std::collections::HashMap;

use rand::RngCore;

use wellspring_core::{Cid, TimestampMs, WellspringError};

/// One live peer session established by the sync hello. No shared state
/// beyond this record exists between peers.
#[derive(Clone, Debug)]
pub struct PeerSession {
    pub session_id: String,
    pub identity: Cid,
    pub capabilities: Vec<String>,
    pub nonce: [u8; 16],
    /// Absolute deadline; expiry releases the session.
    pub deadline: TimestampMs,
}

/// Registry of live peer sessions, pruned on access.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, PeerSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for a peer that completed the hello exchange.
    pub fn open(
        &mut self,
        identity: Cid,
        capabilities: Vec<String>,
        deadline: TimestampMs,
    ) -> PeerSession {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let session_id = hex::encode(nonce);
        let session = PeerSession { session_id: session_id.clone(), identity, capabilities, nonce, deadline };
        self.sessions.insert(session_id, session.clone());
        session
    }

    /// Resolve a session id, dropping it if the deadline has passed.
    pub fn validate(&mut self, session_id: &str, now: TimestampMs) -> Result<&PeerSession, WellspringError> {
        let expired = self
            .sessions
            .get(session_id)
            .is_some_and(|s| s.deadline < now);
        if expired {
            self.sessions.remove(session_id);
        }
        self.sessions
            .get(session_id)
            .ok_or_else(|| WellspringError::Network(format!("unknown or expired session {session_id}")))
    }

    pub fn close(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Drop every session past its deadline.
    pub fn prune(&mut self, now: TimestampMs) {
        self.sessions.retain(|_, s| s.deadline >= now);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
