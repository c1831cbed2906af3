use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::platform::lock_unpoisoned;
use vigil_types::RepoId;

/// Per (repository, path) "backup in flight" flag.
///
/// A second backup for the same pair is rejected, not queued. The TTL is a
/// safety net for jobs that died without clearing their flag; it cannot tell
/// a crashed job from a very long one, so it is configurable.
///
/// Each acquisition hands out a token. Only the holder of the current token
/// can clear the flag, so a job whose flag expired and was taken over cannot
/// clear its successor's.
pub struct BackupGuard {
    ttl: Duration,
    state: Mutex<GuardState>,
}

#[derive(Default)]
struct GuardState {
    next_token: u64,
    running: HashMap<(RepoId, String), Held>,
}

struct Held {
    token: u64,
    expires: Instant,
}

impl BackupGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(GuardState::default()),
        }
    }

    /// Set the flag for `(repo_id, path)`. Returns `None` if it is already
    /// set and not yet expired, otherwise the token to release it with.
    pub fn try_acquire(&self, repo_id: RepoId, path: &str) -> Option<u64> {
        let now = Instant::now();
        let mut state = lock_unpoisoned(&self.state, "backup_guard");
        let key = (repo_id, path.to_string());
        if let Some(held) = state.running.get(&key) {
            if held.expires > now {
                return None;
            }
            tracing::warn!(repo_id, path, "backup flag expired without release, taking over");
        }
        state.next_token += 1;
        let token = state.next_token;
        state.running.insert(
            key,
            Held {
                token,
                expires: now + self.ttl,
            },
        );
        Some(token)
    }

    /// Clear the flag if `token` still owns it. Returns whether it did.
    pub fn release(&self, repo_id: RepoId, path: &str, token: u64) -> bool {
        let mut state = lock_unpoisoned(&self.state, "backup_guard");
        let key = (repo_id, path.to_string());
        if state.running.get(&key).is_some_and(|held| held.token == token) {
            state.running.remove(&key);
            return true;
        }
        tracing::debug!(repo_id, path, token, "backup flag owned by a newer job, left in place");
        false
    }

    pub fn is_running(&self, repo_id: RepoId, path: &str) -> bool {
        lock_unpoisoned(&self.state, "backup_guard")
            .running
            .get(&(repo_id, path.to_string()))
            .is_some_and(|held| held.expires > Instant::now())
    }
}
