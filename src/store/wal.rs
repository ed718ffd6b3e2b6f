use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use super::StoreEvent;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only Write-Ahead Log of document writes.
///
/// Format per entry: `[u32: len][bincode: StoreEvent][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one event. `flush_sync()` durably commits the batch.
    pub fn append_buffered(&mut self, event: &StoreEvent) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[StoreEvent]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<StoreEvent>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!("WAL {}: CRC mismatch, discarding tail", path.display());
                break;
            }

            match bincode::deserialize::<StoreEvent>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        Ok(events)
    }
}

// ── Group-commit writer ──────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: StoreEvent,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<StoreEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, fsync once,
/// answer every sender.
pub(super) async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(StoreEvent, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(StoreEvent, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, &mut vec![(event, response)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn fresh_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("venuebook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn hall_put(name: &str) -> StoreEvent {
        StoreEvent::ResourcePut(Resource {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: name.into(),
            capacity: 40,
            created_at: 0,
        })
    }

    fn closure_put() -> StoreEvent {
        StoreEvent::BlockedTimePut(BlockedTime {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            span: Span::new(1000, 2000),
            status: BlockStatus::Maintenance,
            reason: Some("floor polish".into()),
            recurrence: None,
            created_at: 0,
        })
    }

    /// Writer task over a fresh log, with its command channel.
    fn spawn_writer(path: &Path) -> (mpsc::Sender<WalCommand>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(wal_writer_loop(Wal::open(path).unwrap(), rx));
        (tx, handle)
    }

    async fn queue_append(tx: &mpsc::Sender<WalCommand>, event: StoreEvent) -> oneshot::Receiver<io::Result<()>> {
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Append { event, response }).await.unwrap();
        rx
    }

    async fn appends_since_compact(tx: &mpsc::Sender<WalCommand>) -> u64 {
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::AppendsSinceCompact { response }).await.unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn queued_appends_commit_in_order() {
        let path = fresh_path("group_commit.wal");
        let (tx, writer) = spawn_writer(&path);

        let events: Vec<StoreEvent> = (0..20)
            .map(|i| if i % 2 == 0 { hall_put("Loft") } else { closure_put() })
            .collect();
        // Queue everything before awaiting so the writer can batch
        let mut pending = Vec::new();
        for event in &events {
            pending.push(queue_append(&tx, event.clone()).await);
        }
        for rx in pending {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(appends_since_compact(&tx).await, 20);

        drop(tx);
        writer.await.unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[tokio::test]
    async fn compaction_replaces_history_with_snapshot() {
        let path = fresh_path("compact_swap.wal");
        let (tx, writer) = spawn_writer(&path);

        for _ in 0..10 {
            queue_append(&tx, closure_put()).await.await.unwrap().unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![hall_put("Atrium")];
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Compact {
            events: snapshot.clone(),
            response,
        })
        .await
        .unwrap();
        rx.await.unwrap().unwrap();
        assert!(fs::metadata(&path).unwrap().len() < before);
        assert_eq!(appends_since_compact(&tx).await, 0);

        // Appends after the swap land in the new file
        let after = StoreEvent::BlockedTimeRemoved { id: Ulid::new() };
        queue_append(&tx, after.clone()).await.await.unwrap().unwrap();

        drop(tx);
        writer.await.unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), after]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = fresh_path("torn_tail.wal");
        let kept = hall_put("Loft");
        {
            let mut f = File::create(&path).unwrap();
            encode_event(&mut f, &kept).unwrap();
            // Length prefix and a few payload bytes of an entry cut short
            f.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
    }

    #[test]
    fn missing_log_replays_empty() {
        let path = fresh_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn checksum_mismatch_stops_replay() {
        let path = fresh_path("bad_crc.wal");
        let first = hall_put("Loft");
        {
            let mut f = File::create(&path).unwrap();
            encode_event(&mut f, &first).unwrap();
            let payload = bincode::serialize(&closure_put()).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
            encode_event(&mut f, &hall_put("Annex")).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }
}
