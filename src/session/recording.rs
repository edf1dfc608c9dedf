use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record state changes, inputs and connection events only.
    KeyEventsOnly,
    /// Record key events and raw output chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
    },
    ConnectionClosed {
        reason: String,
    },
    StateChanged {
        state: SessionState,
    },
    /// A line written to the shell, without its trailing newline.
    Input {
        data: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
///
/// Cloning shares the underlying buffer, so a clone handed to a
/// [`SessionAutomator`] records into the caller's instance.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), PlinkError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| PlinkError::Internal(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), PlinkError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, PlinkError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| PlinkError::Internal(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Poisons the buffer lock so every later call fails.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let entries = self.entries.clone();
        let _ = std::thread::spawn(move || {
            let _guard = entries.lock();
            panic!("poisoning recorder lock");
        })
        .join();
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), PlinkError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| PlinkError::Internal(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, PlinkError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| PlinkError::Internal(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, PlinkError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        if jsonl.trim().is_empty() {
            return Ok(recorder);
        }

        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)
                .map_err(|e| PlinkError::Internal(format!("record decode error: {e}")))?;
            parsed.push(entry);
        }

        let mut guard = recorder
            .entries
            .lock()
            .map_err(|e| PlinkError::Internal(format!("record lock error: {e}")))?;
        *guard = parsed;
        drop(guard);

        Ok(recorder)
    }

    /// Output chunks grouped by the input that preceded them.
    ///
    /// The first element holds the chunks seen before any input (the banner).
    pub fn exchanges(&self) -> Result<(Vec<String>, Vec<(String, Vec<String>)>), PlinkError> {
        let mut banner = Vec::new();
        let mut exchanges: Vec<(String, Vec<String>)> = Vec::new();
        for entry in self.entries()? {
            match entry.event {
                SessionEvent::Input { data } => exchanges.push((data, Vec::new())),
                SessionEvent::RawChunk { data } => match exchanges.last_mut() {
                    Some((_, chunks)) => chunks.push(data),
                    None => banner.push(data),
                },
                _ => {}
            }
        }
        Ok((banner, exchanges))
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisoned_recorder_reports_errors() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder.poison();
        assert!(matches!(
            recorder.record_event(SessionEvent::Input {
                data: "show clock".to_string()
            }),
            Err(PlinkError::Internal(_))
        ));
        assert!(recorder.entries().is_err());
    }

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::ConnectionEstablished {
                device_addr: "10.0.0.1".to_string(),
            })
            .expect("record");
        recorder
            .record_raw_chunk("Router1>".to_string())
            .expect("record");

        let jsonl = recorder.to_jsonl().expect("encode");
        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode");
        let entries = restored.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[1].event,
            SessionEvent::RawChunk { data } if data == "Router1>"
        ));
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder.record_raw_chunk("noise".to_string()).expect("record");
        recorder
            .record_event(SessionEvent::StateChanged {
                state: SessionState::CommandLoop,
            })
            .expect("record");
        assert_eq!(recorder.entries().expect("entries").len(), 1);
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder
            .record_event(SessionEvent::Input {
                data: "show ver".to_string(),
            })
            .expect("record");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_accepts_empty_input() {
        let recorder = SessionRecorder::from_jsonl("\n  \n").expect("decode");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn recorder_clear_removes_all_entries() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder.record_raw_chunk("x".to_string()).expect("record");
        recorder.clear().expect("clear");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn exchanges_group_chunks_under_preceding_input() {
        let jsonl = r#"{"ts_ms":1,"event":{"kind":"raw_chunk","data":"R1>"}}
{"ts_ms":2,"event":{"kind":"state_changed","state":"command_loop"}}
{"ts_ms":3,"event":{"kind":"input","data":"show clock"}}
{"ts_ms":4,"event":{"kind":"raw_chunk","data":"12:00\r\n"}}
{"ts_ms":5,"event":{"kind":"raw_chunk","data":"R1>"}}
{"ts_ms":6,"event":{"kind":"input","data":"exit"}}"#;
        let recorder = SessionRecorder::from_jsonl(jsonl).expect("decode");
        let (banner, exchanges) = recorder.exchanges().expect("exchanges");

        assert_eq!(banner, vec!["R1>".to_string()]);
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].0, "show clock");
        assert_eq!(exchanges[0].1, vec!["12:00\r\n".to_string(), "R1>".to_string()]);
        assert!(exchanges[1].1.is_empty());
    }

    #[test]
    fn malformed_line_is_reported_as_internal_error() {
        let err = SessionRecorder::from_jsonl("{not json").expect_err("must fail");
        assert!(matches!(err, PlinkError::Internal(_)));
    }
}
