//! Shared sync status types read by client surfaces.

use serde::Serialize;

/// Coarse sync state of a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Passive sync flags. Failures are recorded here instead of being raised.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_syncing: bool,
    /// Last hydration or persistence failure, cleared by the next successful hydration.
    pub sync_error: Option<String>,
    /// Unix ms of the last successful hydration.
    pub last_sync_time: Option<i64>,
}

impl SyncStatus {
    pub(crate) fn begin(&mut self) {
        self.is_syncing = true;
        self.state = SyncState::Syncing;
    }

    pub(crate) fn succeed(&mut self, at: i64) {
        self.is_syncing = false;
        self.state = SyncState::Synced;
        self.sync_error = None;
        self.last_sync_time = Some(at);
    }

    /// Record a failure without changing the coarse state.
    pub(crate) fn note_error(&mut self, message: impl Into<String>) {
        self.sync_error = Some(message.into());
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.is_syncing = false;
        self.state = SyncState::Error;
        self.sync_error = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        let mut status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Offline);

        status.begin();
        assert!(status.is_syncing);

        status.fail("unreachable");
        assert!(!status.is_syncing);
        assert_eq!(status.state, SyncState::Error);
        assert_eq!(status.sync_error.as_deref(), Some("unreachable"));

        status.note_error("pending");
        assert_eq!(status.state, SyncState::Error);
        assert_eq!(status.sync_error.as_deref(), Some("pending"));

        status.succeed(42);
        assert_eq!(status.state, SyncState::Synced);
        assert_eq!(status.sync_error, None);
        assert_eq!(status.last_sync_time, Some(42));
    }
}
