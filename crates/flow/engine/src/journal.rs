//! File-backed flow state journal.
//!
//! Every save appends the full serialized [`FlowState`] as one framed
//! record, and every remove appends a tombstone; opening the journal
//! replays it and keeps the latest record per session that has not been
//! removed. A record cut short by a crash is dropped and the file truncated
//! back to the last good record. Once superseded records outnumber live
//! ones the file is rewritten in place.
//!
//! File format: `[magic:4][version:2][reserved:2][records...]`
//! Record format: `[length:4][sequence:8][entry_json:N][crc32:4]`

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use warden_flow_types::{FlowError, FlowResult, FlowState, SessionId};

use crate::persistence::FlowStateStore;

const JOURNAL_MAGIC: [u8; 4] = *b"WFSJ";
const JOURNAL_VERSION: u16 = 2;
/// magic(4) + version(2) + reserved(2)
const HEADER_SIZE: usize = 8;
/// length(4) + sequence(8)
const RECORD_HEADER_SIZE: usize = 12;
const CRC_SIZE: usize = 4;

/// Records written before the journal considers compacting itself.
pub const DEFAULT_COMPACT_AFTER: u64 = 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Save { state: FlowState },
    Remove { session_id: SessionId },
}

struct JournalInner {
    file: File,
    sequence: u64,
    records: u64,
    latest: BTreeMap<SessionId, FlowState>,
}

/// [`FlowStateStore`] backed by an append-only file.
pub struct JournalFlowStore {
    path: PathBuf,
    sync: bool,
    compact_after: u64,
    inner: Mutex<JournalInner>,
}

struct Replay {
    latest: BTreeMap<SessionId, FlowState>,
    sequence: u64,
    records: u64,
    valid_len: usize,
}

impl JournalFlowStore {
    /// Open the journal at `path`, creating it if needed.
    pub fn open(path: impl Into<PathBuf>) -> FlowResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let replay = if bytes.is_empty() {
            file.write_all(&header())?;
            Replay {
                latest: BTreeMap::new(),
                sequence: 0,
                records: 0,
                valid_len: HEADER_SIZE,
            }
        } else {
            replay(&bytes)?
        };

        if !bytes.is_empty() && replay.valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - replay.valid_len,
                "Journal has a torn tail, truncating"
            );
            file.set_len(replay.valid_len as u64)?;
        }
        file.seek(SeekFrom::End(0))?;

        info!(
            path = %path.display(),
            records = replay.records,
            sessions = replay.latest.len(),
            "Flow journal opened"
        );

        Ok(Self {
            path,
            sync: false,
            compact_after: DEFAULT_COMPACT_AFTER,
            inner: Mutex::new(JournalInner {
                file,
                sequence: replay.sequence,
                records: replay.records,
                latest: replay.latest,
            }),
        })
    }

    /// fsync after every save.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Compact automatically once the file holds at least `records`
    /// records and fewer than half of them are live. Zero disables it.
    pub fn with_compact_after(mut self, records: u64) -> Self {
        self.compact_after = records;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in the file, including superseded ones.
    pub fn records(&self) -> u64 {
        self.inner.lock().records
    }

    /// Rewrite the journal with one record per live session, dropping
    /// finished ones. Returns the number of sessions kept.
    pub fn compact(&self) -> FlowResult<usize> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut JournalInner) -> FlowResult<usize> {
        inner.latest.retain(|_, state| !state.is_terminal());

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&header())?;
        let mut sequence = 0;
        for state in inner.latest.values() {
            sequence += 1;
            let entry = JournalEntry::Save {
                state: state.clone(),
            };
            tmp.write_all(&encode_record(sequence, &entry)?)?;
        }
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        inner.file = file;
        inner.sequence = sequence;
        inner.records = sequence;

        info!(path = %self.path.display(), sessions = sequence, "Flow journal compacted");
        Ok(sequence as usize)
    }
}

impl JournalFlowStore {
    fn append(&self, inner: &mut JournalInner, entry: &JournalEntry) -> FlowResult<u64> {
        let sequence = inner.sequence + 1;
        let record = encode_record(sequence, entry)?;
        inner.file.write_all(&record)?;
        if self.sync {
            inner.file.sync_data()?;
        }
        inner.sequence = sequence;
        inner.records += 1;
        Ok(sequence)
    }

    fn maybe_compact(&self, inner: &mut JournalInner) -> FlowResult<()> {
        let live = inner.latest.len() as u64;
        if self.compact_after > 0
            && inner.records >= self.compact_after
            && inner.records >= live.saturating_mul(2)
        {
            self.compact_locked(inner)?;
        }
        Ok(())
    }
}

impl FlowStateStore for JournalFlowStore {
    fn save(&self, state: &FlowState) -> FlowResult<()> {
        let mut inner = self.inner.lock();
        let entry = JournalEntry::Save {
            state: state.clone(),
        };
        let sequence = self.append(&mut inner, &entry)?;
        if let JournalEntry::Save { state } = entry {
            inner.latest.insert(state.session_id.clone(), state);
        }
        debug!(session_id = %state.session_id, sequence, "Flow state journaled");
        self.maybe_compact(&mut inner)
    }

    fn remove(&self, session_id: &SessionId) -> FlowResult<()> {
        let mut inner = self.inner.lock();
        if inner.latest.remove(session_id).is_none() {
            return Ok(());
        }
        let entry = JournalEntry::Remove {
            session_id: session_id.clone(),
        };
        let sequence = self.append(&mut inner, &entry)?;
        debug!(session_id = %session_id, sequence, "Flow state removed from journal");
        self.maybe_compact(&mut inner)
    }

    fn load_all(&self) -> FlowResult<Vec<FlowState>> {
        Ok(self.inner.lock().latest.values().cloned().collect())
    }
}

impl std::fmt::Debug for JournalFlowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalFlowStore")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("compact_after", &self.compact_after)
            .finish()
    }
}

fn header() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&JOURNAL_MAGIC);
    header[4..6].copy_from_slice(&JOURNAL_VERSION.to_le_bytes());
    header
}

fn encode_record(sequence: u64, entry: &JournalEntry) -> FlowResult<Vec<u8>> {
    let bytes = serde_json::to_vec(entry)?;
    let length = u32::try_from(bytes.len())
        .map_err(|_| FlowError::Persistence("flow state too large to journal".into()))?;
    let crc = crc32fast::hash(&bytes);

    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + bytes.len() + CRC_SIZE);
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(&sequence.to_le_bytes());
    record.extend_from_slice(&bytes);
    record.extend_from_slice(&crc.to_le_bytes());
    Ok(record)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn replay(bytes: &[u8]) -> FlowResult<Replay> {
    if bytes.len() < HEADER_SIZE || bytes[..4] != JOURNAL_MAGIC {
        return Err(FlowError::Persistence("not a flow journal".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != JOURNAL_VERSION {
        return Err(FlowError::Persistence(format!(
            "unsupported journal version {}",
            version
        )));
    }

    let mut replay = Replay {
        latest: BTreeMap::new(),
        sequence: 0,
        records: 0,
        valid_len: HEADER_SIZE,
    };
    let mut pos = HEADER_SIZE;
    while bytes.len() - pos >= RECORD_HEADER_SIZE {
        let length = read_u32(&bytes[pos..]) as usize;
        let sequence = read_u64(&bytes[pos + 4..]);
        let body_start = pos + RECORD_HEADER_SIZE;
        let body_end = body_start + length;
        if body_end + CRC_SIZE > bytes.len() {
            break;
        }
        let body = &bytes[body_start..body_end];
        if crc32fast::hash(body) != read_u32(&bytes[body_end..]) {
            warn!(sequence, offset = pos, "Journal record checksum mismatch");
            break;
        }
        match serde_json::from_slice(body) {
            Ok(JournalEntry::Save { state }) => {
                replay.latest.insert(state.session_id.clone(), state);
            }
            Ok(JournalEntry::Remove { session_id }) => {
                replay.latest.remove(&session_id);
            }
            Err(e) => {
                warn!(sequence, error = %e, "Journal record does not decode");
                break;
            }
        }
        replay.sequence = replay.sequence.max(sequence);
        replay.records += 1;
        pos = body_end + CRC_SIZE;
        replay.valid_len = pos;
    }
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_flow_types::FlowStatus;
    use warden_store::Token;

    fn state(id: &str, status: FlowStatus) -> FlowState {
        let mut st = FlowState::new(
            SessionId::new(id),
            "Interrogate",
            serde_json::json!({"step": 1}),
            Token::system(),
        );
        st.status = status;
        st
    }

    #[test]
    fn test_reopen_keeps_latest_record_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.journal");
        {
            let journal = JournalFlowStore::open(&path).unwrap();
            journal.save(&state("W:1", FlowStatus::Running)).unwrap();
            journal.save(&state("W:2", FlowStatus::Waiting)).unwrap();
            journal.save(&state("W:1", FlowStatus::Waiting)).unwrap();
            assert_eq!(journal.records(), 3);
        }

        let journal = JournalFlowStore::open(&path).unwrap();
        let states = journal.load_all().unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| s.status == FlowStatus::Waiting));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.journal");
        {
            let journal = JournalFlowStore::open(&path).unwrap();
            journal.save(&state("W:1", FlowStatus::Waiting)).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            let entry = JournalEntry::Save {
                state: state("W:2", FlowStatus::Waiting),
            };
            let partial = encode_record(2, &entry).unwrap();
            file.write_all(&partial[..partial.len() / 2]).unwrap();
        }

        let journal = JournalFlowStore::open(&path).unwrap();
        assert_eq!(journal.load_all().unwrap().len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        journal.save(&state("W:3", FlowStatus::Waiting)).unwrap();
        drop(journal);
        let journal = JournalFlowStore::open(&path).unwrap();
        assert_eq!(journal.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_compact_drops_finished_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.journal");
        let journal = JournalFlowStore::open(&path).unwrap();
        journal.save(&state("W:1", FlowStatus::Waiting)).unwrap();
        journal.save(&state("W:1", FlowStatus::Done)).unwrap();
        journal.save(&state("W:2", FlowStatus::Waiting)).unwrap();
        journal.save(&state("W:2", FlowStatus::Waiting)).unwrap();

        assert_eq!(journal.compact().unwrap(), 1);
        assert_eq!(journal.records(), 1);
        journal.save(&state("W:3", FlowStatus::Running)).unwrap();
        drop(journal);

        let journal = JournalFlowStore::open(&path).unwrap();
        let mut ids: Vec<_> = journal
            .load_all()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["W:2", "W:3"]);
    }

    #[test]
    fn test_removed_sessions_stay_removed_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.journal");
        {
            let journal = JournalFlowStore::open(&path).unwrap();
            journal.save(&state("W:1", FlowStatus::Waiting)).unwrap();
            journal.save(&state("W:2", FlowStatus::Waiting)).unwrap();
            journal.save(&state("W:1", FlowStatus::Done)).unwrap();
            journal.remove(&SessionId::new("W:1")).unwrap();
            journal.remove(&SessionId::new("W:1")).unwrap();
            assert_eq!(journal.records(), 4);
        }

        let journal = JournalFlowStore::open(&path).unwrap();
        let states = journal.load_all().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].session_id.as_str(), "W:2");
    }

    #[test]
    fn test_finished_sessions_do_not_grow_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.journal");
        let journal = JournalFlowStore::open(&path).unwrap().with_compact_after(16);
        journal.save(&state("W:LIVE", FlowStatus::Waiting)).unwrap();

        for n in 0..500 {
            let id = format!("W:{:08X}", n);
            journal.save(&state(&id, FlowStatus::Running)).unwrap();
            journal.save(&state(&id, FlowStatus::Done)).unwrap();
            journal.remove(&SessionId::new(id.as_str())).unwrap();
        }

        assert!(journal.records() < 16);
        assert_eq!(journal.load_all().unwrap().len(), 1);
        drop(journal);
        let journal = JournalFlowStore::open(&path).unwrap();
        assert_eq!(journal.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-journal");
        std::fs::write(&path, b"hello world").unwrap();
        assert!(matches!(
            JournalFlowStore::open(&path),
            Err(FlowError::Persistence(_))
        ));
    }
}
