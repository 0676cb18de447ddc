//! NDJSON record store.
//!
//! Every aggregate handed over by the engine becomes one line:
//!
//! ```text
//! {"seq":1,"ts":"2026-01-05T12:00:00Z","data":{"subject":"12345678000190",...}}
//! ```
//!
//! Lines are flushed as they are written so a crashed run keeps every
//! aggregate completed before the crash.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

use fiscalis_core::{CoreError, RecordStore, SubjectAggregate, UtcDateTime};
use serde::Serialize;

#[derive(Serialize)]
struct StoredLine<'a> {
    seq: u64,
    ts: UtcDateTime,
    data: &'a SubjectAggregate,
}

/// Line writer with a monotonically increasing sequence number starting at 1.
pub struct NdjsonWriter<W: Write> {
    writer: W,
    next_seq: u64,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_seq: 1,
        }
    }

    pub fn write(&mut self, aggregate: &SubjectAggregate) -> Result<(), CoreError> {
        let line = StoredLine {
            seq: self.next_seq,
            ts: UtcDateTime::now(),
            data: aggregate,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.next_seq += 1;
        Ok(())
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

/// Appends aggregates to a file, one JSON document per line.
pub struct NdjsonRecordStore {
    writer: Mutex<NdjsonWriter<BufWriter<File>>>,
}

impl NdjsonRecordStore {
    /// Opens `path` for appending, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(NdjsonWriter::new(BufWriter::new(file))),
        })
    }
}

impl RecordStore for NdjsonRecordStore {
    fn store<'a>(
        &'a self,
        aggregate: &'a SubjectAggregate,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut writer = self
                .writer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writer.write(aggregate)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscalis_core::SubjectId;
    use serde_json::Value;

    fn aggregate(raw: &str) -> SubjectAggregate {
        SubjectAggregate::new(
            SubjectId::parse(raw).expect("valid subject"),
            Some(String::from("EMPRESA TESTE LTDA")),
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            7,
        )
    }

    #[test]
    fn writer_numbers_lines_from_one() {
        let mut writer = NdjsonWriter::new(Vec::new());

        writer.write(&aggregate("12345678000190")).expect("write");
        writer.write(&aggregate("52998224725")).expect("write");

        assert_eq!(writer.next_seq(), 3);
        let text = String::from_utf8(writer.writer).expect("utf8");
        let lines = text
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("json line"))
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["seq"], 1);
        assert_eq!(lines[1]["seq"], 2);
        assert_eq!(lines[1]["data"]["subject"], "52998224725");
        assert!(lines[0]["ts"].as_str().is_some_and(|ts| ts.ends_with('Z')));
    }

    #[tokio::test]
    async fn store_appends_to_an_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("aggregates.ndjson");
        std::fs::write(&path, "{\"seq\":1}\n").expect("seed file");

        let store = NdjsonRecordStore::open(&path).expect("open");
        store
            .store(&aggregate("12345678000190"))
            .await
            .expect("store");

        let text = std::fs::read_to_string(&path).expect("read back");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"display_name\":\"EMPRESA TESTE LTDA\""));
    }
}
