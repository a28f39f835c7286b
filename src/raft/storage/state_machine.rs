use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    codec,
    engine::KvEngine,
    raft::types::{ApplyOutcome, CommandPayload, NodeId, NodeMeta, TypeConfig},
};

use openraft::entry::RaftPayload as _;
use openraft::{
    EntryPayload, ErrorSubject, ErrorVerb, LogId, Snapshot, SnapshotMeta, StoredMembership,
};
use openraft::storage::RaftStateMachine;

/// Wire terminator for a snapshot stream: zero or more JSON command
/// objects followed by this token. An empty snapshot is the token alone.
pub const SNAPSHOT_CLOSING_TOKEN: &[u8] = b"]";

#[derive(Debug)]
struct SmInner {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, NodeMeta>,
    current_snapshot: Option<(SnapshotMeta<NodeId, NodeMeta>, Vec<u8>)>,
}

/// Deterministic interpreter of committed log entries against the engine.
///
/// The engine is the authoritative, durable state. Raft-side metadata
/// (applied index, membership, current snapshot) is held in memory only:
/// a restarted node starts from a fresh log and the engine's contents,
/// which is exactly what the read path serves.
#[derive(Debug, Clone)]
pub struct KvStateMachine {
    engine: KvEngine,
    snapshot_dir: PathBuf,
    max_snapshots: usize,
    inner: Arc<Mutex<SmInner>>,
}

impl KvStateMachine {
    pub async fn open(
        engine: KvEngine,
        snapshot_dir: PathBuf,
        max_snapshots: usize,
    ) -> Result<Self, openraft::StorageError<NodeId>> {
        let dir = snapshot_dir.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&dir))
            .await
            .expect("spawn_blocking create snapshot dir")
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;

        Ok(Self {
            engine,
            snapshot_dir,
            max_snapshots,
            inner: Arc::new(Mutex::new(SmInner {
                last_applied: None,
                last_membership: StoredMembership::default(),
                current_snapshot: None,
            })),
        })
    }
}

/// Interprets one committed command payload against the engine.
///
/// Every failure mode short of an engine I/O fault is absorbed here: a
/// payload that does not parse, or names an operation nobody knows, is
/// logged and applied as a no-op so the apply loop never stalls on a bad
/// entry. Engine errors are reported inside the outcome, attached to the
/// value the command attempted.
pub(crate) fn apply_command(engine: &KvEngine, payload: Value) -> ApplyOutcome {
    let cmd: CommandPayload = match serde_json::from_value(payload) {
        Ok(cmd) => cmd,
        Err(err) => {
            warn!(%err, "discarding log entry with malformed command payload");
            return ApplyOutcome::Ignored;
        }
    };

    let op = cmd.operation.trim().to_ascii_uppercase();
    match op.as_str() {
        "SET" => {
            let error = match codec::to_stored_bytes(&cmd.value) {
                Ok(Some(bytes)) => engine.put(cmd.key.as_bytes(), &bytes).err().map(|e| e.to_string()),
                // Null stores nothing; the outcome still reports it as applied.
                Ok(None) => None,
                Err(err) => Some(err.to_string()),
            };
            ApplyOutcome::Applied {
                error,
                data: cmd.value,
            }
        }
        "GET" => match engine.get(cmd.key.as_bytes()) {
            Ok(Some(bytes)) => match codec::from_stored_bytes(&bytes) {
                Ok(data) => ApplyOutcome::Applied { error: None, data },
                Err(err) => ApplyOutcome::Applied {
                    error: Some(err.to_string()),
                    data: Value::Object(serde_json::Map::new()),
                },
            },
            Ok(None) => ApplyOutcome::Applied {
                error: None,
                data: Value::Object(serde_json::Map::new()),
            },
            Err(err) => ApplyOutcome::Applied {
                error: Some(err.to_string()),
                data: Value::Object(serde_json::Map::new()),
            },
        },
        "DELETE" => ApplyOutcome::Applied {
            error: engine.delete(cmd.key.as_bytes()).err().map(|e| e.to_string()),
            data: Value::Null,
        },
        other => {
            warn!(operation = other, "ignoring log entry with unknown operation");
            ApplyOutcome::Ignored
        }
    }
}

/// Replays a snapshot stream: JSON command objects terminated by a
/// closing token, each applied as an engine put. Returns how many objects
/// were restored. Prior engine state is intentionally left in place; the
/// engine is authoritative across restarts.
pub(crate) fn replay_snapshot_stream(engine: &KvEngine, buf: &[u8]) -> io::Result<usize> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<CommandPayload>();
    let mut restored = 0usize;
    loop {
        let offset = stream.byte_offset();
        match stream.next() {
            Some(Ok(cmd)) => {
                let bytes = codec::to_stored_bytes(&cmd.value).map_err(io::Error::other)?;
                if let Some(bytes) = bytes {
                    engine
                        .put(cmd.key.as_bytes(), &bytes)
                        .map_err(io::Error::other)?;
                }
                restored += 1;
            }
            Some(Err(err)) => {
                let rest = buf[offset..].trim_ascii_start();
                if rest.first() == Some(&SNAPSHOT_CLOSING_TOKEN[0]) {
                    break;
                }
                return Err(io::Error::other(err));
            }
            None => break,
        }
    }
    Ok(restored)
}

#[derive(Debug)]
pub struct KvSnapshotBuilder {
    inner: Arc<Mutex<SmInner>>,
    snapshot_dir: PathBuf,
    max_snapshots: usize,
}

impl openraft::RaftSnapshotBuilder<TypeConfig> for KvSnapshotBuilder {
    async fn build_snapshot(
        &mut self,
    ) -> Result<Snapshot<TypeConfig>, openraft::StorageError<NodeId>> {
        let (last_applied, last_membership) = {
            let inner = self.inner.lock().await;
            (inner.last_applied, inner.last_membership.clone())
        };

        // The engine persists every applied write on its own, so the
        // snapshot carries no data. It exists to let the log truncate.
        let bytes = SNAPSHOT_CLOSING_TOKEN.to_vec();
        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id: format!(
                "snapshot-{}",
                last_applied.as_ref().map(|l| l.index).unwrap_or(0)
            ),
        };

        persist_snapshot_files(&self.snapshot_dir, &meta, &bytes, self.max_snapshots)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;

        {
            let mut inner = self.inner.lock().await;
            inner.current_snapshot = Some((meta.clone(), bytes.clone()));
        }

        Ok(Snapshot {
            meta,
            snapshot: Box::new(std::io::Cursor::new(bytes)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for KvStateMachine {
    type SnapshotBuilder = KvSnapshotBuilder;

    async fn applied_state(
        &mut self,
    ) -> Result<
        (Option<LogId<NodeId>>, StoredMembership<NodeId, NodeMeta>),
        openraft::StorageError<NodeId>,
    > {
        let inner = self.inner.lock().await;
        Ok((inner.last_applied, inner.last_membership.clone()))
    }

    async fn apply<I>(
        &mut self,
        entries: I,
    ) -> Result<Vec<ApplyOutcome>, openraft::StorageError<NodeId>>
    where
        I: IntoIterator<Item = openraft::impls::Entry<TypeConfig>> + openraft::OptionalSend,
        I::IntoIter: openraft::OptionalSend,
    {
        let mut responses = Vec::new();

        for entry in entries {
            let log_id = entry.log_id;
            if let Some(membership) = entry.get_membership() {
                let mut inner = self.inner.lock().await;
                inner.last_membership = StoredMembership::new(Some(log_id), membership.clone());
            }

            let resp = match entry.payload {
                EntryPayload::Normal(payload) => apply_command(&self.engine, payload),
                EntryPayload::Membership(_) | EntryPayload::Blank => ApplyOutcome::Ignored,
            };

            {
                let mut inner = self.inner.lock().await;
                inner.last_applied = Some(log_id);
            }

            responses.push(resp);
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        KvSnapshotBuilder {
            inner: self.inner.clone(),
            snapshot_dir: self.snapshot_dir.clone(),
            max_snapshots: self.max_snapshots,
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<
        Box<<TypeConfig as openraft::RaftTypeConfig>::SnapshotData>,
        openraft::StorageError<NodeId>,
    > {
        Ok(Box::new(std::io::Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, NodeMeta>,
        mut snapshot: Box<<TypeConfig as openraft::RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), openraft::StorageError<NodeId>> {
        use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};

        let _ = snapshot.seek(std::io::SeekFrom::Start(0)).await;
        let mut buf = Vec::new();
        snapshot
            .read_to_end(&mut buf)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;

        let restored = {
            let engine = self.engine.clone();
            let data = buf.clone();
            tokio::task::spawn_blocking(move || replay_snapshot_stream(&engine, &data))
                .await
                .expect("spawn_blocking replay snapshot")
                .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?
        };
        info!(
            snapshot_id = meta.snapshot_id,
            restored, "installed snapshot"
        );

        {
            let mut inner = self.inner.lock().await;
            inner.last_applied = meta.last_log_id;
            inner.last_membership = meta.last_membership.clone();
            inner.current_snapshot = Some((meta.clone(), buf.clone()));
        }

        persist_snapshot_files(&self.snapshot_dir, meta, &buf, self.max_snapshots)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner.current_snapshot.as_ref().map(|(meta, bytes)| Snapshot {
            meta: meta.clone(),
            snapshot: Box::new(std::io::Cursor::new(bytes.clone())),
        }))
    }
}

fn io_err(
    subject: ErrorSubject<NodeId>,
    verb: ErrorVerb,
    err: io::Error,
) -> openraft::StorageError<NodeId> {
    openraft::StorageError::from_io_error(subject, verb, err)
}

async fn persist_snapshot_files(
    dir: &Path,
    meta: &SnapshotMeta<NodeId, NodeMeta>,
    bytes: &[u8],
    max_snapshots: usize,
) -> io::Result<()> {
    let dir = dir.to_path_buf();
    let meta_bytes = serde_json::to_vec_pretty(meta).map_err(io::Error::other)?;
    let data = bytes.to_vec();
    let snapshot_id = meta.snapshot_id.clone();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        write_atomic(&dir.join(format!("{snapshot_id}.meta.json")), &meta_bytes)?;
        write_atomic(&dir.join(format!("{snapshot_id}.data")), &data)?;
        prune_snapshot_files(&dir, max_snapshots)
    })
    .await
    .expect("spawn_blocking persist snapshot")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)
}

/// Keeps the `keep` most recent snapshots (by log index embedded in the
/// file name) and deletes the rest.
fn prune_snapshot_files(dir: &Path, keep: usize) -> io::Result<()> {
    let mut indexed: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".meta.json") else {
            continue;
        };
        let Some(index) = stem.strip_prefix("snapshot-").and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        indexed.push((index, path));
    }

    indexed.sort_by_key(|(index, _)| std::cmp::Reverse(*index));
    for (_, meta_path) in indexed.into_iter().skip(keep) {
        let data_path = PathBuf::from(meta_path.to_string_lossy().replace(".meta.json", ".data"));
        std::fs::remove_file(&meta_path)?;
        let _ = std::fs::remove_file(&data_path);
    }
    Ok(())
}
