//! Durable, JSON-lines implementation of `LedgerStore` and `PurgeStore`.
//!
//! Layout under the data directory, one subdirectory per tenant:
//!
//! ```text
//! <data_dir>/<tenant>/entries.jsonl      one AuditEntry per line, append-only
//! <data_dir>/<tenant>/head.json          ChainHead, replaced atomically per append
//! <data_dir>/<tenant>/checkpoints.jsonl  ChainCheckpoint history, last line is current
//! ```
//!
//! An in-memory index of `(sequence, byte offset)` pairs lets pages be read
//! with a seek instead of a scan.  Each append is `sync_data`'d before the
//! head is replaced; if either step fails the entry line is cut off again so
//! the file, the index and the head never disagree.
//!
//! A line that no longer decodes does not stop the store from opening.  If
//! its sequence can still be read it stays indexed and `read_records`
//! returns it as `EntryRecord::Unreadable`; otherwise it is left out of the
//! index and shows up as a missing sequence.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use ledgerseal_contracts::{
    chain::{ChainCheckpoint, ChainHead, SequenceReservation},
    config::StoreConfig,
    entry::{AuditEntry, TenantId},
    error::{LedgerError, LedgerResult},
};
use ledgerseal_core::{builder::validate_tenant, EntryRecord, LedgerStore, PurgeStore};

use crate::tenant::{check_append, next_reservation, SequenceGate};

const ENTRIES_FILE: &str = "entries.jsonl";
const HEAD_FILE: &str = "head.json";
const CHECKPOINTS_FILE: &str = "checkpoints.jsonl";

struct FileChain {
    head: ChainHead,
    checkpoint: Option<ChainCheckpoint>,
    /// `(sequence, byte offset)` sorted by sequence.
    index: Vec<(u64, u64)>,
    /// Current length of `entries.jsonl`.
    len: u64,
}

struct FileTenant {
    dir: PathBuf,
    chain: Mutex<FileChain>,
    gate: SequenceGate,
}

impl FileTenant {
    fn entries_path(&self) -> PathBuf {
        self.dir.join(ENTRIES_FILE)
    }
}

/// A ledger store that persists every tenant under one directory.
pub struct FileLedgerStore {
    root: PathBuf,
    tenants: RwLock<HashMap<TenantId, Arc<FileTenant>>>,
    page_size: usize,
    reservation_timeout: Duration,
}

impl FileLedgerStore {
    /// Open (or create) the store rooted at `config.data_dir`.
    pub fn open(config: &StoreConfig) -> LedgerResult<Self> {
        let root = config.data_dir.clone().ok_or_else(|| LedgerError::Config {
            reason: "store.data_dir is required for the file store".to_string(),
        })?;
        Self::open_at(&root, config)
    }

    /// Open (or create) the store rooted at `root`, loading every tenant.
    pub fn open_at(root: &Path, config: &StoreConfig) -> LedgerResult<Self> {
        fs::create_dir_all(root).map_err(|e| io_err("create data dir", root, e))?;
        let reservation_timeout = Duration::from_millis(config.reservation_timeout_ms);

        let mut tenants = HashMap::new();
        let listing = fs::read_dir(root).map_err(|e| io_err("list data dir", root, e))?;
        for dir_entry in listing {
            let dir_entry = dir_entry.map_err(|e| io_err("list data dir", root, e))?;
            let path = dir_entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if validate_tenant(name).is_err() {
                warn!(dir = %path.display(), "skipping directory that is not a tenant id");
                continue;
            }
            let tenant = TenantId::new(name);
            let chain = load_chain(&tenant, &path)?;
            debug!(tenant = %tenant, head = chain.head.sequence, entries = chain.index.len(), "tenant loaded");
            tenants.insert(
                tenant,
                Arc::new(FileTenant {
                    dir: path,
                    chain: Mutex::new(chain),
                    gate: SequenceGate::new(reservation_timeout),
                }),
            );
        }

        info!(root = %root.display(), tenants = tenants.len(), "file ledger store opened");
        Ok(Self {
            root: root.to_path_buf(),
            tenants: RwLock::new(tenants),
            page_size: config.page_size.max(1),
            reservation_timeout,
        })
    }

    /// Directory holding `tenant`'s files.
    pub fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(tenant.as_str())
    }

    fn existing(&self, tenant: &TenantId) -> LedgerResult<Option<Arc<FileTenant>>> {
        let map = self
            .tenants
            .read()
            .map_err(|e| LedgerError::store(format!("tenant map lock poisoned: {}", e)))?;
        Ok(map.get(tenant).cloned())
    }

    fn slot(&self, tenant: &TenantId) -> LedgerResult<Arc<FileTenant>> {
        if let Some(slot) = self.existing(tenant)? {
            return Ok(slot);
        }
        validate_tenant(tenant.as_str())?;
        let mut map = self
            .tenants
            .write()
            .map_err(|e| LedgerError::store(format!("tenant map lock poisoned: {}", e)))?;
        if let Some(slot) = map.get(tenant) {
            return Ok(Arc::clone(slot));
        }
        let dir = self.tenant_dir(tenant);
        fs::create_dir_all(&dir).map_err(|e| io_err("create tenant dir", &dir, e))?;
        let slot = Arc::new(FileTenant {
            dir,
            chain: Mutex::new(FileChain {
                head: ChainHead::genesis(tenant.clone()),
                checkpoint: None,
                index: Vec::new(),
                len: 0,
            }),
            gate: SequenceGate::new(self.reservation_timeout),
        });
        map.insert(tenant.clone(), Arc::clone(&slot));
        Ok(slot)
    }
}

fn lock_chain(slot: &FileTenant) -> LedgerResult<MutexGuard<'_, FileChain>> {
    slot.chain
        .lock()
        .map_err(|e| LedgerError::store(format!("tenant chain lock poisoned: {}", e)))
}

impl LedgerStore for FileLedgerStore {
    fn reserve_sequence(&self, tenant: &TenantId) -> LedgerResult<SequenceReservation> {
        let slot = self.slot(tenant)?;
        slot.gate
            .acquire(tenant, || Ok(next_reservation(&lock_chain(&slot)?.head)))
    }

    fn release_sequence(&self, reservation: &SequenceReservation) {
        if let Ok(Some(slot)) = self.existing(&reservation.tenant) {
            slot.gate.release(reservation.sequence);
        }
    }

    fn append(&self, entry: AuditEntry) -> LedgerResult<AuditEntry> {
        let slot = self.slot(entry.tenant())?;
        let sequence = entry.sequence();
        {
            let mut chain = lock_chain(&slot)?;
            if let Err(e) = check_append(&chain.head, chain.checkpoint.as_ref(), &entry) {
                warn!(tenant = %entry.tenant(), sequence, error = %e, "append rejected");
                return Err(e);
            }

            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            let path = slot.entries_path();
            let offset = chain.len;
            if let Err(e) = write_line_at(&path, offset, &line) {
                truncate_to(&path, offset);
                return Err(e);
            }

            let mut head = chain.head.clone();
            head.advance_to(&entry);
            if let Err(e) = write_json_atomic(&slot.dir.join(HEAD_FILE), &head) {
                truncate_to(&path, offset);
                return Err(e);
            }

            chain.head = head;
            chain.index.push((sequence, offset));
            chain.len = offset + line.len() as u64;
        }
        slot.gate.release(sequence);
        Ok(entry)
    }

    fn chain_head(&self, tenant: &TenantId) -> LedgerResult<ChainHead> {
        match self.existing(tenant)? {
            Some(slot) => Ok(lock_chain(&slot)?.head.clone()),
            None => Ok(ChainHead::genesis(tenant.clone())),
        }
    }

    fn latest_checkpoint(&self, tenant: &TenantId) -> LedgerResult<Option<ChainCheckpoint>> {
        match self.existing(tenant)? {
            Some(slot) => Ok(lock_chain(&slot)?.checkpoint.clone()),
            None => Ok(None),
        }
    }

    fn read_page(
        &self,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<AuditEntry>> {
        if from > through || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(slot) = self.existing(tenant)? else {
            return Ok(Vec::new());
        };
        let chain = lock_chain(&slot)?;
        read_entries_at(&slot.entries_path(), &page_of(&chain.index, from, through, limit))
    }

    fn read_records(
        &self,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<EntryRecord>> {
        if from > through || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(slot) = self.existing(tenant)? else {
            return Ok(Vec::new());
        };
        let chain = lock_chain(&slot)?;
        read_records_at(&slot.entries_path(), &page_of(&chain.index, from, through, limit))
    }

    fn tenants(&self) -> LedgerResult<Vec<TenantId>> {
        let map = self
            .tenants
            .read()
            .map_err(|e| LedgerError::store(format!("tenant map lock poisoned: {}", e)))?;
        let mut tenants = Vec::new();
        for (tenant, slot) in map.iter() {
            if !lock_chain(slot)?.head.is_empty() {
                tenants.push(tenant.clone());
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

impl PurgeStore for FileLedgerStore {
    fn purge_prefix(&self, checkpoint: &ChainCheckpoint) -> LedgerResult<u64> {
        let violation = |reason: String| LedgerError::ImmutabilityViolation {
            tenant: checkpoint.tenant.to_string(),
            sequence: checkpoint.sequence,
            reason,
        };
        let slot = self
            .existing(&checkpoint.tenant)?
            .ok_or_else(|| violation("tenant has no chain".to_string()))?;
        let mut chain = lock_chain(&slot)?;
        let path = slot.entries_path();

        let named = chain
            .index
            .iter()
            .find(|(seq, _)| *seq == checkpoint.sequence)
            .copied()
            .ok_or_else(|| violation("checkpoint names no stored entry".to_string()))?;
        let stored = read_records_at(&path, &[named])?;
        let stored_hash = match stored.first() {
            Some(EntryRecord::Entry(entry)) => Some(entry.entry_hash.as_str()),
            _ => None,
        };
        if stored_hash != Some(checkpoint.entry_hash.as_str()) {
            return Err(violation("checkpoint hash does not match the stored entry".to_string()));
        }

        let removed = chain
            .index
            .iter()
            .filter(|(seq, _)| *seq <= checkpoint.sequence)
            .count() as u64;
        let recorded = ChainCheckpoint {
            purged_count: removed,
            ..checkpoint.clone()
        };

        // Checkpoint first: a crash before the rewrite leaves a chain the
        // verifier still reads from the checkpoint onwards.
        let mut line = serde_json::to_vec(&recorded)?;
        line.push(b'\n');
        append_line(&slot.dir.join(CHECKPOINTS_FILE), &line)?;

        // Retained lines are copied byte for byte, undecodable ones included.
        let retained: Vec<(u64, u64)> = chain
            .index
            .iter()
            .filter(|(seq, _)| *seq > checkpoint.sequence)
            .copied()
            .collect();
        let kept = read_lines_at(&path, &retained)?;
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut out = File::create(&tmp).map_err(|e| io_err("create", &tmp, e))?;
            for (_, line) in &kept {
                out.write_all(line.trim_end_matches('\n').as_bytes())
                    .and_then(|_| out.write_all(b"\n"))
                    .map_err(|e| io_err("write", &tmp, e))?;
            }
            out.sync_all().map_err(|e| io_err("sync", &tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| io_err("replace", &path, e))?;

        let (index, len) = index_entries(&path)?;
        chain.index = index;
        chain.len = len;
        chain.checkpoint = Some(recorded);

        info!(
            tenant = %checkpoint.tenant,
            through = checkpoint.sequence,
            removed,
            "prefix purged behind checkpoint"
        );
        Ok(removed)
    }
}

// ── File helpers ──────────────────────────────────────────────────────────────

fn io_err(action: &str, path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::store(format!("failed to {} '{}': {}", action, path.display(), e))
}

fn load_chain(tenant: &TenantId, dir: &Path) -> LedgerResult<FileChain> {
    let entries_path = dir.join(ENTRIES_FILE);
    let (index, len) = if entries_path.exists() {
        index_entries(&entries_path)?
    } else {
        (Vec::new(), 0)
    };

    let head_path = dir.join(HEAD_FILE);
    let head = if head_path.exists() {
        read_json::<ChainHead>(&head_path)?
    } else if !index.is_empty() {
        warn!(tenant = %tenant, "head.json missing, deriving head from last readable entry");
        let records = read_records_at(&entries_path, &index)?;
        let mut head = ChainHead::genesis(tenant.clone());
        if let Some(entry) = records.iter().rev().find_map(|record| match record {
            EntryRecord::Entry(entry) => Some(entry),
            EntryRecord::Unreadable { .. } => None,
        }) {
            head.advance_to(entry);
        }
        head
    } else {
        ChainHead::genesis(tenant.clone())
    };

    let checkpoints_path = dir.join(CHECKPOINTS_FILE);
    let checkpoint = if checkpoints_path.exists() {
        last_line::<ChainCheckpoint>(&checkpoints_path)?
    } else {
        None
    };

    Ok(FileChain {
        head,
        checkpoint,
        index,
        len,
    })
}

/// Scan `entries.jsonl` into a sorted `(sequence, offset)` index.
///
/// Lines without a readable `sequence` are skipped.  The returned length
/// stops before an unterminated last line.
fn index_entries(path: &Path) -> LedgerResult<(Vec<(u64, u64)>, u64)> {
    #[derive(serde::Deserialize)]
    struct SequenceOnly {
        sequence: u64,
    }

    let file = File::open(path).map_err(|e| io_err("open", path, e))?;
    let mut reader = BufReader::new(file);
    let mut index = Vec::new();
    let mut offset = 0u64;
    let mut line = String::new();
    let mut line_no = 0usize;
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| io_err("read", path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;
        if !line.ends_with('\n') {
            // Torn tail of an append that never committed; the next append overwrites it.
            warn!(path = %path.display(), line = line_no, "ignoring unterminated last line");
            break;
        }
        if !line.trim().is_empty() {
            match serde_json::from_str::<SequenceOnly>(&line) {
                Ok(parsed) => index.push((parsed.sequence, offset)),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %e,
                    "entry line has no readable sequence, leaving it out of the index"
                ),
            }
        }
        offset += read as u64;
    }
    index.sort_by_key(|(seq, _)| *seq);
    Ok((index, offset))
}

/// `(sequence, offset)` pairs of the index slice `from..=through`, at most `limit`.
fn page_of(index: &[(u64, u64)], from: u64, through: u64, limit: usize) -> Vec<(u64, u64)> {
    let start = index.partition_point(|(seq, _)| *seq < from);
    index[start..]
        .iter()
        .take_while(|(seq, _)| *seq <= through)
        .take(limit)
        .copied()
        .collect()
}

/// Raw lines at the given index positions, newline included.
fn read_lines_at(path: &Path, positions: &[(u64, u64)]) -> LedgerResult<Vec<(u64, String)>> {
    if positions.is_empty() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| io_err("open", path, e))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(positions.len());
    for (sequence, offset) in positions {
        reader
            .seek(SeekFrom::Start(*offset))
            .map_err(|e| io_err("seek", path, e))?;
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|e| io_err("read", path, e))?;
        lines.push((*sequence, line));
    }
    Ok(lines)
}

fn read_records_at(path: &Path, positions: &[(u64, u64)]) -> LedgerResult<Vec<EntryRecord>> {
    Ok(read_lines_at(path, positions)?
        .into_iter()
        .map(|(sequence, line)| match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) if entry.sequence() == sequence => EntryRecord::Entry(entry),
            Ok(entry) => EntryRecord::Unreadable {
                sequence,
                reason: format!("line moved under the index, now holds sequence {}", entry.sequence()),
            },
            Err(e) => EntryRecord::Unreadable {
                sequence,
                reason: format!("entry does not decode: {}", e),
            },
        })
        .collect())
}

fn read_entries_at(path: &Path, positions: &[(u64, u64)]) -> LedgerResult<Vec<AuditEntry>> {
    read_records_at(path, positions)?
        .into_iter()
        .map(|record| match record {
            EntryRecord::Entry(entry) => Ok(entry),
            EntryRecord::Unreadable { sequence, reason } => Err(LedgerError::store(format!(
                "unreadable entry {} in '{}': {}",
                sequence,
                path.display(),
                reason
            ))),
        })
        .collect()
}

/// Write `line` at `offset`, the committed end of the file.
///
/// Bytes past `offset` are left-overs of an append that never committed and
/// are cut off first.
fn write_line_at(path: &Path, offset: u64, line: &[u8]) -> LedgerResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_err("open", path, e))?;
    let len = file.metadata().map_err(|e| io_err("stat", path, e))?.len();
    if len != offset {
        warn!(path = %path.display(), len, committed = offset, "discarding uncommitted bytes");
        file.set_len(offset).map_err(|e| io_err("truncate", path, e))?;
    }
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| io_err("seek", path, e))?;
    file.write_all(line).map_err(|e| io_err("append to", path, e))?;
    file.sync_data().map_err(|e| io_err("sync", path, e))
}

fn append_line(path: &Path, line: &[u8]) -> LedgerResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err("open", path, e))?;
    file.write_all(line).map_err(|e| io_err("append to", path, e))?;
    file.sync_data().map_err(|e| io_err("sync", path, e))
}

/// Cut a partially committed append back off.
fn truncate_to(path: &Path, len: u64) {
    let result = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_len(len).and_then(|_| f.sync_data()));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to roll back entry line");
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> LedgerResult<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| io_err("create", &tmp, e))?;
        let bytes = serde_json::to_vec(value)?;
        file.write_all(&bytes).map_err(|e| io_err("write", &tmp, e))?;
        file.sync_all().map_err(|e| io_err("sync", &tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_err("replace", path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> LedgerResult<T> {
    let bytes = fs::read(path).map_err(|e| io_err("read", path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LedgerError::store(format!("unreadable '{}': {}", path.display(), e)))
}

fn last_line<T: DeserializeOwned>(path: &Path) -> LedgerResult<Option<T>> {
    let file = File::open(path).map_err(|e| io_err("open", path, e))?;
    let mut last = None;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_err("read", path, e))?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    last.map(|l| {
        serde_json::from_str(&l)
            .map_err(|e| LedgerError::store(format!("unreadable '{}': {}", path.display(), e)))
    })
    .transpose()
}
