//! Append-only conversation history backed by a JSONL file.
//!
//! Each completed message is written as one JSON object per line. Loading
//! keeps only the newest `max_messages` entries, and `compact` rewrites the
//! file down to that bound.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::orchestrator::ChatMessage;

/// Seconds since Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Short process-unique message id from PID, timestamp and a counter.
pub fn generate_message_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let ts = epoch_secs();
    format!("msg-{:x}-{n}", pid ^ (ts as u32))
}

/// JSONL message store. A `noop` store keeps nothing.
pub struct ConversationHistory {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    max_messages: usize,
}

impl ConversationHistory {
    /// Create/open a JSONL history file. Creates parent directories.
    pub fn open(path: PathBuf, max_messages: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: Some(path),
            max_messages,
        })
    }

    /// A store that discards everything.
    pub fn noop() -> Self {
        Self {
            writer: None,
            path: None,
            max_messages: 0,
        }
    }

    /// Append one message, flush immediately. Write failures are logged.
    pub fn append(&mut self, message: &ChatMessage) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("history: failed to serialize message {}: {e}", message.id);
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            log::warn!("history: failed to append message {}: {e}", message.id);
        }
    }

    /// The newest `max_messages` messages, oldest first. Unreadable lines
    /// are skipped.
    pub fn load(&self) -> Vec<ChatMessage> {
        let mut messages = self.read_all();
        if messages.len() > self.max_messages {
            messages.drain(..messages.len() - self.max_messages);
        }
        messages
    }

    fn read_all(&self) -> Vec<ChatMessage> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .filter_map(|line| {
                let line = line.ok()?;
                if line.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str(&line) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        log::debug!("history: skipping unreadable line: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    /// Rewrite the file keeping only the newest `max_messages` entries.
    /// Returns how many were dropped.
    pub fn compact(&mut self) -> io::Result<usize> {
        let Some(path) = self.path.clone() else {
            return Ok(0);
        };
        let total = self.read_all().len();
        let kept = self.load();
        let dropped = total - kept.len();
        if dropped == 0 {
            return Ok(0);
        }

        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for message in &kept {
                let line = serde_json::to_string(message).map_err(io::Error::other)?;
                writeln!(out, "{line}")?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, &path)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = Some(BufWriter::new(file));
        log::debug!("history: compacted {}, dropped {dropped}", path.display());
        Ok(dropped)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }
}
