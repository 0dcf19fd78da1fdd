//! Pluggable server event log

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub trait EventLog: Send + Sync {
    fn connected(&self, _user: &str) {}
    fn disconnected(&self, _user: &str) {}
    fn rejected(&self, _user: &str, _reason: &str) {}
    fn uploaded(&self, _user: &str, _key: &str, _bytes: u64) {}
    fn deleted(&self, _user: &str, _key: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLog;
impl EventLog for NoopLog {}

/// Timestamped text log, one line per event.
pub struct TextLog {
    file: Mutex<File>,
}

impl TextLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl EventLog for TextLog {
    fn connected(&self, user: &str) {
        self.line(&format!("CONNECT user={}", user));
    }
    fn disconnected(&self, user: &str) {
        self.line(&format!("DISCONNECT user={}", user));
    }
    fn rejected(&self, user: &str, reason: &str) {
        self.line(&format!("REJECT user={} reason={}", user, reason));
    }
    fn uploaded(&self, user: &str, key: &str, bytes: u64) {
        self.line(&format!("UPLOAD user={} key={} bytes={}", user, key, bytes));
    }
    fn deleted(&self, user: &str, key: &str) {
        self.line(&format!("DELETE user={} key={}", user, key));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}

/// Plain stderr log for the daemon's interactive use.
pub struct StderrLog;

impl EventLog for StderrLog {
    fn connected(&self, user: &str) {
        eprintln!("client connected: {}", user);
    }
    fn disconnected(&self, user: &str) {
        eprintln!("client disconnected: {}", user);
    }
    fn rejected(&self, user: &str, reason: &str) {
        eprintln!("rejected {}: {}", user, reason);
    }
    fn uploaded(&self, user: &str, key: &str, bytes: u64) {
        eprintln!("upload by {}: {} ({} bytes)", user, key, bytes);
    }
    fn deleted(&self, user: &str, key: &str) {
        eprintln!("delete by {}: {}", user, key);
    }
    fn error(&self, context: &str, msg: &str) {
        eprintln!("error [{}]: {}", context, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn text_log_appends_timestamped_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("server.log");
        let log = TextLog::new(&path).unwrap();
        log.connected("alice");
        log.uploaded("alice", "alice_report.txt", 5);
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("CONNECT user=alice"));
        assert!(lines[1].contains("bytes=5"));
        assert!(lines[0].starts_with('['));
    }
}
