//! Tail of the backend's output log.
//!
//! `GET /output` always returns the whole (capped) message list, so the
//! client remembers the list it last saw and reports only what was appended
//! to it since. Messages carry no id and identical ones repeat, so the
//! comparison is over the whole overlap, not a single anchor message.

use crate::records::{OutputLog, OutputMessage};

#[derive(Debug, Default)]
pub struct OutputTail {
    seen: Vec<OutputMessage>,
}

impl OutputTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the messages of `log` not returned by earlier calls.
    ///
    /// The new log is matched against the longest tail of the previous one
    /// it starts with; older messages may have rolled off the backend's cap.
    /// With no overlap at all (the log was cleared) everything counts as new.
    pub fn ingest<'a>(&mut self, log: &'a OutputLog) -> &'a [OutputMessage] {
        let start = (0..=self.seen.len())
            .find(|&dropped| log.messages.starts_with(&self.seen[dropped..]))
            .map(|dropped| self.seen.len() - dropped)
            .unwrap_or(0);

        self.seen.clone_from(&log.messages);
        &log.messages[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::OutputLevel;

    fn msg(timestamp: &str, message: &str) -> OutputMessage {
        OutputMessage {
            timestamp: timestamp.into(),
            level: OutputLevel::Info,
            message: message.into(),
        }
    }

    #[test]
    fn test_first_ingest_returns_everything() {
        let mut tail = OutputTail::new();
        let log = OutputLog {
            messages: vec![msg("10:00:00", "a"), msg("10:00:01", "b")],
        };
        assert_eq!(tail.ingest(&log).len(), 2);
        assert!(tail.ingest(&log).is_empty());
    }

    #[test]
    fn test_only_new_messages_after_anchor() {
        let mut tail = OutputTail::new();
        let mut log = OutputLog {
            messages: vec![msg("10:00:00", "a")],
        };
        tail.ingest(&log);

        log.messages.push(msg("10:00:02", "b"));
        log.messages.push(msg("10:00:03", "c"));
        let new = tail.ingest(&log);
        assert_eq!(new, &[msg("10:00:02", "b"), msg("10:00:03", "c")]);
    }

    #[test]
    fn test_anchor_survives_capped_log() {
        let mut tail = OutputTail::new();
        let log = OutputLog {
            messages: vec![msg("1", "a"), msg("2", "b"), msg("3", "c")],
        };
        tail.ingest(&log);

        // Oldest message rolled off, one new appended; length unchanged
        let log = OutputLog {
            messages: vec![msg("2", "b"), msg("3", "c"), msg("4", "d")],
        };
        assert_eq!(tail.ingest(&log), &[msg("4", "d")]);
    }

    #[test]
    fn test_repeated_identical_message_is_reported() {
        let mut tail = OutputTail::new();
        let mut log = OutputLog {
            messages: vec![msg("10:00:00", "Saved")],
        };
        assert_eq!(tail.ingest(&log).len(), 1);

        // Same text within the same second
        log.messages.push(msg("10:00:00", "Saved"));
        assert_eq!(tail.ingest(&log), &[msg("10:00:00", "Saved")]);

        // Earlier text showing up again after something else
        log.messages.push(msg("10:00:01", "Building"));
        log.messages.push(msg("10:00:00", "Saved"));
        assert_eq!(
            tail.ingest(&log),
            &[msg("10:00:01", "Building"), msg("10:00:00", "Saved")]
        );
        assert!(tail.ingest(&log).is_empty());
    }

    #[test]
    fn test_cleared_log_starts_over() {
        let mut tail = OutputTail::new();
        tail.ingest(&OutputLog {
            messages: vec![msg("1", "a")],
        });

        assert!(tail.ingest(&OutputLog::default()).is_empty());

        let log = OutputLog {
            messages: vec![msg("5", "fresh")],
        };
        assert_eq!(tail.ingest(&log), &[msg("5", "fresh")]);
    }
}
