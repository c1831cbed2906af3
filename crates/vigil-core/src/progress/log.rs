use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use super::Throttle;
use crate::lifecycle::{ClientMessage, LiveRegistry, LogLevel, LogLine};

/// Log of a maintenance job, mirrored to the attached client.
pub struct OperationLog {
    live: Arc<LiveRegistry<()>>,
    id: u64,
    lines: Vec<LogLine>,
    limited: usize,
    max_limited: usize,
    throttle: Throttle,
}

pub type SharedLog = Arc<Mutex<OperationLog>>;

impl OperationLog {
    pub fn new(live: Arc<LiveRegistry<()>>, id: u64, max_limited: usize, min_pause: Duration) -> Self {
        Self {
            live,
            id,
            lines: Vec::new(),
            limited: 0,
            max_limited,
            throttle: Throttle::new(min_pause),
        }
    }

    pub fn shared(self) -> SharedLog {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record a line and send it immediately.
    pub fn append(&mut self, level: LogLevel, text: impl Into<String>) {
        let line = LogLine {
            level,
            text: text.into(),
            time: Utc::now(),
            clear: false,
        };
        self.throttle.allow(true);
        self.live.send(self.id, &ClientMessage::Log(line.clone()));
        self.lines.push(line);
    }

    /// Like [`append`](Self::append), but only the first `max_limited` calls
    /// since the last [`reset_limit`](Self::reset_limit) are kept.
    pub fn append_limited(&mut self, level: LogLevel, text: impl Into<String>) -> bool {
        if self.limited >= self.max_limited {
            return false;
        }
        self.limited += 1;
        self.append(level, text);
        true
    }

    pub fn reset_limit(&mut self) {
        self.limited = 0;
    }

    /// Counter-style line that replaces the previous counter line. Sent to
    /// the client only when the throttle allows.
    pub fn progress(&mut self, text: impl Into<String>) {
        let line = LogLine {
            level: LogLevel::Info,
            text: text.into(),
            time: Utc::now(),
            clear: true,
        };
        if self.throttle.allow(false) {
            self.live.send(self.id, &ClientMessage::Log(line.clone()));
        }
        match self.lines.last_mut() {
            Some(last) if last.clear => *last = line,
            _ => self.lines.push(line),
        }
    }

    /// Send every line recorded so far to the attached client.
    pub fn replay(&mut self) {
        self.throttle.allow(true);
        for line in &self.lines {
            if !self.live.send(self.id, &ClientMessage::Log(line.clone())) {
                break;
            }
        }
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn has_errors(&self) -> bool {
        self.lines.iter().any(|l| l.level == LogLevel::Error)
    }
}
