//! Snapshot digests for closed sessions
//!
//! Finalized and abandoned sessions are frozen. Each gets a SHA-256
//! digest over its content so the frozen accumulator can be checked
//! later. Bookkeeping fields the store changes on save (revision,
//! updated_at, the digest itself) are left out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use uuid::Uuid;

use crate::machine::FlowState;
use crate::models::FlowKind;
use crate::session::{QaEntry, Session, SessionData};

#[derive(Serialize)]
struct SnapshotView<'a, S, D> {
    session_id: Uuid,
    user_id: Uuid,
    flow: FlowKind,
    state: &'a S,
    abstraction_mode: bool,
    skip_count: u8,
    transcript: &'a [QaEntry],
    data: &'a D,
    completed: bool,
    output: &'a Option<String>,
    bet_id: Option<Uuid>,
    portfolio_version_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

/// SHA-256 over the session content, hex encoded.
/// Streams JSON straight into the hasher.
pub fn compute_snapshot_hash<S: FlowState, D: SessionData>(session: &Session<S, D>) -> String {
    let view = SnapshotView {
        session_id: session.session_id,
        user_id: session.user_id,
        flow: session.flow,
        state: &session.state,
        abstraction_mode: session.abstraction_mode,
        skip_count: session.skip_count,
        transcript: &session.transcript,
        data: &session.data,
        completed: session.completed,
        output: &session.output,
        bet_id: session.bet_id,
        portfolio_version_id: session.portfolio_version_id,
        created_at: session.created_at,
    };

    let mut hasher = Sha256::new();
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &view).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Attach the digest. Called on the final snapshot before it is saved.
pub fn seal<S: FlowState, D: SessionData>(session: Session<S, D>) -> Session<S, D> {
    let hash = compute_snapshot_hash(&session);
    Session {
        snapshot_hash: Some(hash),
        ..session
    }
}

/// True when the stored digest still matches the content.
pub fn verify_integrity<S: FlowState, D: SessionData>(session: &Session<S, D>) -> bool {
    match &session.snapshot_hash {
        Some(hash) => !hash.is_empty() && *hash == compute_snapshot_hash(session),
        None => false,
    }
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::QuickState;
    use crate::session::QuickData;

    fn closed_session() -> Session<QuickState, QuickData> {
        Session::new(Uuid::new_v4())
            .with_entry(QaEntry::answered("role_context", "Q", "Head of data, team of 6", false))
            .completed_with(Some("report".to_string()))
    }

    #[test]
    fn test_sealed_snapshot_verifies() {
        let sealed = seal(closed_session());
        assert_eq!(sealed.snapshot_hash.as_ref().unwrap().len(), 64);
        assert!(verify_integrity(&sealed));
    }

    #[test]
    fn test_store_bookkeeping_does_not_break_digest() {
        let mut sealed = seal(closed_session());
        sealed.revision += 1;
        sealed.updated_at = Utc::now();
        assert!(verify_integrity(&sealed));
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut sealed = seal(closed_session());
        sealed.transcript[0].answer = "edited later".to_string();
        assert!(!verify_integrity(&sealed));

        assert!(!verify_integrity(&closed_session()));
    }
}
