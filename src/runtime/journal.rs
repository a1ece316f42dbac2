//! Run log: chained, append-only JSONL record of executed commands
//!
//! Every command that completes successfully is written as one line:
//!
//! ```json
//! {"function":{"name":"...","arguments":{...}},
//!  "timestamp_before":0,"state_before":{...},
//!  "timestamp_after":0,"state_after":{...}}
//! ```
//!
//! Entries are chained: `state_before` of entry *n* is exactly `state_after`
//! of entry *n-1*. Replay depends on this. Several logged commands may be in
//! flight at once, so the chain is fixed in completion order by
//! [`RunLog::finish`]; the snapshot taken by [`RunLog::begin`] is only
//! compared against the chain to report drift. A mutation that never
//! completes ([`RunLog::abandon`]) cuts the chain: the next entry starts
//! from its own dispatch snapshot, and [`verify_chain`] flags the gap.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{JournalError, JournalResult};

/// Command name and arguments as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Command name.
    pub name: String,
    /// Arguments object.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// One logged command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Command executed.
    pub function: FunctionCall,
    /// Epoch milliseconds at dispatch.
    pub timestamp_before: i64,
    /// State the command was applied to: the previous entry's
    /// `state_after`, or the dispatch snapshot when there is none.
    pub state_before: Value,
    /// Epoch milliseconds at completion.
    pub timestamp_after: i64,
    /// Snapshot at completion.
    pub state_after: Value,
}

/// First half of an entry, captured at dispatch and carried until the
/// command completes.
#[derive(Debug, Clone, PartialEq)]
pub struct LogStart {
    function: FunctionCall,
    timestamp_before: i64,
    dispatched: Value,
}

impl LogStart {
    /// Command being logged.
    pub fn function(&self) -> &FunctionCall {
        &self.function
    }
}

/// Step read back for replay: only `function` is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayStep {
    /// Command to re-send.
    pub function: FunctionCall,
}

/// Append-only writer.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
    last_state: Option<Value>,
    in_flight: usize,
    entries: u64,
}

impl RunLog {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn create(path: impl Into<PathBuf>) -> JournalResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "run log opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            last_state: None,
            in_flight: 0,
            entries: 0,
        })
    }

    /// Open a timestamped log (`YYYYmmdd_HHMMSS.jsonl`) under `dir`.
    pub fn create_in(dir: &Path, now: DateTime<Local>) -> JournalResult<Self> {
        Self::create(dir.join(log_file_name(now)))
    }

    /// Start an entry from the state at dispatch.
    ///
    /// With no other entry in flight, a dispatch state that differs from the
    /// last `state_after` means the simulation moved outside logged commands;
    /// that is reported but does not cut the chain.
    pub fn begin(&mut self, function: FunctionCall, dispatched: Value, timestamp_ms: i64) -> LogStart {
        if self.in_flight == 0 {
            if let Some(previous) = &self.last_state {
                if *previous != dispatched {
                    tracing::warn!(
                        command = %function.name,
                        "state drifted between commands; chaining from previous entry"
                    );
                }
            }
        }
        self.in_flight += 1;
        LogStart {
            function,
            timestamp_before: timestamp_ms,
            dispatched,
        }
    }

    /// Complete an entry and append it, chained to the last entry written.
    pub fn finish(&mut self, start: LogStart, state_after: Value, timestamp_ms: i64) -> JournalResult<()> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let state_before = match self.last_state.take() {
            Some(previous) => previous,
            None => start.dispatched,
        };
        let entry = LogEntry {
            function: start.function,
            timestamp_before: start.timestamp_before,
            state_before,
            timestamp_after: timestamp_ms,
            state_after,
        };
        let written = self.append(&entry);
        self.last_state = Some(entry.state_after);
        written?;
        self.entries += 1;
        Ok(())
    }

    /// Drop an entry whose command mutated the simulation but never
    /// completed. The next entry is not chained to anything before it.
    pub fn abandon(&mut self, start: LogStart) {
        self.in_flight = self.in_flight.saturating_sub(1);
        tracing::warn!(
            command = %start.function.name,
            "mutation not logged; run log chain cut"
        );
        self.last_state = None;
    }

    /// Drop an entry whose command was rejected before it touched the
    /// simulation. The chain is unaffected.
    pub fn discard(&mut self, start: LogStart) {
        self.in_flight = self.in_flight.saturating_sub(1);
        tracing::trace!(command = %start.function.name, "log entry discarded");
    }

    fn append(&mut self, entry: &LogEntry) -> JournalResult<()> {
        serde_json::to_writer(&mut self.writer, entry).map_err(JournalError::Encoding)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Entries started but neither finished nor abandoned.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written by this writer.
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

/// `20261016_093000.jsonl`
pub fn log_file_name(now: DateTime<Local>) -> String {
    format!("{}.jsonl", now.format("%Y%m%d_%H%M%S"))
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> JournalResult<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .map_err(|source| JournalError::Decoding { line: i + 1, source })?;
        out.push(item);
    }
    Ok(out)
}

/// Read every entry of a run log.
pub fn read_log(path: &Path) -> JournalResult<Vec<LogEntry>> {
    read_lines(path)
}

/// Read only the commands of a run log, tolerating entries that carry
/// nothing but `function`.
pub fn read_steps(path: &Path) -> JournalResult<Vec<FunctionCall>> {
    let steps: Vec<ReplayStep> = read_lines(path)?;
    Ok(steps.into_iter().map(|step| step.function).collect())
}

/// Check `state_after[k] == state_before[k + 1]` for every adjacent pair.
pub fn verify_chain(entries: &[LogEntry]) -> JournalResult<()> {
    for (index, pair) in entries.windows(2).enumerate() {
        if pair[0].state_after != pair[1].state_before {
            return Err(JournalError::ChainBroken { index: index + 1 });
        }
    }
    Ok(())
}

/// Most recently modified `.jsonl` file in `dir`.
pub fn latest_log(dir: &Path) -> JournalResult<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn call(name: &str) -> FunctionCall {
        FunctionCall {
            name: name.to_string(),
            arguments: Map::new(),
        }
    }

    #[test]
    fn test_run_log_chains_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("runs").join("test.jsonl");
        let mut log = RunLog::create(&path).unwrap();

        let start = log.begin(call("start_run"), json!({ "state": 11 }), 1);
        log.finish(start, json!({ "state": 7 }), 2).unwrap();

        // Fresh state ignored once a previous entry exists.
        let start = log.begin(call("skip_or_select_blind"), json!({ "state": 99 }), 3);
        log.finish(start, json!({ "state": 1 }), 4).unwrap();

        let entries = read_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(log.entries(), 2);
        assert_eq!(entries[0].state_before, json!({ "state": 11 }));
        assert_eq!(entries[1].state_before, entries[0].state_after);
        verify_chain(&entries).unwrap();
    }

    #[test]
    fn test_overlapping_entries_chain_in_completion_order() {
        let temp = TempDir::new().unwrap();
        let mut log = RunLog::create(temp.path().join("overlap.jsonl")).unwrap();

        let start = log.begin(call("start_run"), json!({ "state": 11 }), 1);
        log.finish(start, json!({ "state": 7 }), 2).unwrap();

        // Both dispatched against the same state.
        let sell_joker = log.begin(call("sell_joker"), json!({ "state": 7, "n": 2 }), 3);
        let sell_consumable = log.begin(call("sell_consumable"), json!({ "state": 7, "n": 2 }), 4);
        assert_eq!(log.in_flight(), 2);
        log.finish(sell_joker, json!({ "state": 7, "n": 1 }), 5).unwrap();
        log.finish(sell_consumable, json!({ "state": 7, "n": 0 }), 6).unwrap();
        assert_eq!(log.in_flight(), 0);

        let entries = read_log(log.path()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].state_before, json!({ "state": 7, "n": 1 }));
        verify_chain(&entries).unwrap();
    }

    #[test]
    fn test_abandoned_entry_cuts_chain() {
        let temp = TempDir::new().unwrap();
        let mut log = RunLog::create(temp.path().join("cut.jsonl")).unwrap();

        let start = log.begin(call("start_run"), json!({ "state": 11 }), 1);
        log.finish(start, json!({ "state": 7 }), 2).unwrap();

        let lost = log.begin(call("skip_or_select_blind"), json!({ "state": 7 }), 3);
        log.abandon(lost);
        assert_eq!(log.in_flight(), 0);

        let start = log.begin(call("sell_joker"), json!({ "state": 1 }), 4);
        log.finish(start, json!({ "state": 1, "sold": true }), 5).unwrap();

        let entries = read_log(log.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].state_before, json!({ "state": 1 }));
        match verify_chain(&entries) {
            Err(JournalError::ChainBroken { index }) => assert_eq!(index, 1),
            other => panic!("expected chain break, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_chain_detects_break() {
        let entry = |before: i64, after: i64| LogEntry {
            function: call("get_game_state"),
            timestamp_before: 0,
            state_before: json!(before),
            timestamp_after: 0,
            state_after: json!(after),
        };
        let entries = vec![entry(1, 2), entry(2, 3), entry(4, 5)];

        match verify_chain(&entries) {
            Err(JournalError::ChainBroken { index }) => assert_eq!(index, 2),
            other => panic!("expected chain break, got {:?}", other),
        }
    }

    #[test]
    fn test_read_steps_accepts_bare_functions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("steps.jsonl");
        fs::write(
            &path,
            "{\"function\":{\"name\":\"start_run\",\"arguments\":{\"deck\":\"Red Deck\"}}}\n\n\
             {\"function\":{\"name\":\"cash_out\"}}\n",
        )
        .unwrap();

        let steps = read_steps(&path).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].arguments["deck"], "Red Deck");
        assert!(steps[1].arguments.is_empty());
    }

    #[test]
    fn test_read_log_reports_bad_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.jsonl");
        fs::write(&path, "{\"function\":{\"name\":\"x\"}}\nnot json\n").unwrap();

        match read_steps(&path) {
            Err(JournalError::Decoding { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected decoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_latest_log_picks_jsonl() {
        let temp = TempDir::new().unwrap();
        assert!(latest_log(&temp.path().join("missing")).unwrap().is_none());

        fs::write(temp.path().join("notes.txt"), "x").unwrap();
        fs::write(temp.path().join("a.jsonl"), "").unwrap();
        let latest = latest_log(temp.path()).unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "a.jsonl");
    }
}
