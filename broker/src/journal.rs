use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::Serialize;

/// Append-only durable stream facility backing the broker's journal
/// directory (spec.md §6.3). Not consumed by the current core — it exists so
/// a future replay/recovery feature has somewhere to read from — but every
/// publish is recorded here when a broker is built with `Broker::with_journal`.
#[derive(Clone)]
pub struct Journal {
    file: Arc<Mutex<File>>,
}

#[derive(Serialize)]
struct JournalRecord<'a> {
    subject: &'a str,
    #[serde(with = "base64_bytes")]
    payload: &'a [u8],
}

impl Journal {
    /// Opens (creating if needed) `<dir>/journal.ndjson` for appending.
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("journal.ndjson"))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Appends one record. Each line is a JSON object `{subject, payload}`
    /// with `payload` base64-encoded so arbitrary bytes round-trip.
    pub fn append(&self, subject: &str, payload: &[u8]) -> std::io::Result<()> {
        let record = JournalRecord { subject, payload };
        let mut line = serde_json::to_vec(&record).expect("journal record always serializes");
        line.push(b'\n');
        self.file.lock().write_all(&line)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_line_per_record() {
        let dir = tempfile_dir();
        let journal = Journal::open(dir.clone()).unwrap();
        journal.append("sekia.events.github", b"hello").unwrap();
        journal.append("sekia.events.slack", b"world").unwrap();

        let contents = std::fs::read_to_string(dir.join("journal.ndjson")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("sekia.events.github"));

        std::fs::remove_dir_all(dir).ok();
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sekia-journal-test-{}", std::process::id()));
        dir
    }
}
