//! Persisted record collections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, VigilError};
use crate::platform::lock_unpoisoned;

/// A persisted record with a numeric id and a set of individually
/// updatable fields.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// A single-field mutation, applied by [`RecordStore::update_field`].
    type Field: Send;

    const COLLECTION: &'static str;

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
    fn touch(&mut self, now: DateTime<Utc>, created: bool);
    fn apply(&mut self, field: Self::Field);
}

pub trait RecordStore<R: Record>: Send + Sync {
    /// Insert `record`, assigning its id.
    fn create(&self, record: &mut R) -> Result<()>;
    fn get(&self, id: u64) -> Result<R>;
    /// Replace the stored record with the same id.
    fn update(&self, record: &R) -> Result<()>;
    fn update_field(&self, id: u64, field: R::Field) -> Result<()>;
    /// All records, newest id first.
    fn list(&self) -> Result<Vec<R>>;
    fn delete(&self, id: u64) -> Result<()>;
    /// Block until every accepted mutation is durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn not_found<R: Record>(id: u64) -> VigilError {
    VigilError::RecordNotFound {
        collection: R::COLLECTION,
        id,
    }
}

struct Collection<R> {
    next_id: u64,
    records: BTreeMap<u64, R>,
}

impl<R: Record> Collection<R> {
    fn new(records: BTreeMap<u64, R>) -> Self {
        let next_id = records.keys().next_back().copied().unwrap_or(0) + 1;
        Self { next_id, records }
    }

    fn create(&mut self, record: &mut R) {
        record.set_id(self.next_id);
        record.touch(Utc::now(), true);
        self.records.insert(self.next_id, record.clone());
        self.next_id += 1;
    }

    fn update(&mut self, record: &R) -> Result<()> {
        let slot = self
            .records
            .get_mut(&record.id())
            .ok_or_else(|| not_found::<R>(record.id()))?;
        *slot = record.clone();
        slot.touch(Utc::now(), false);
        Ok(())
    }

    fn update_field(&mut self, id: u64, field: R::Field) -> Result<()> {
        let slot = self.records.get_mut(&id).ok_or_else(|| not_found::<R>(id))?;
        slot.apply(field);
        slot.touch(Utc::now(), false);
        Ok(())
    }

    fn delete(&mut self, id: u64) -> Result<()> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found::<R>(id))
    }

    fn list(&self) -> Vec<R> {
        self.records.values().rev().cloned().collect()
    }
}

/// In-memory store, used by tests and by deployments without a data dir.
pub struct MemoryStore<R> {
    inner: Mutex<Collection<R>>,
}

impl<R: Record> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Collection::new(BTreeMap::new())),
        }
    }
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordStore<R> for MemoryStore<R> {
    fn create(&self, record: &mut R) -> Result<()> {
        lock_unpoisoned(&self.inner, R::COLLECTION).create(record);
        Ok(())
    }

    fn get(&self, id: u64) -> Result<R> {
        lock_unpoisoned(&self.inner, R::COLLECTION)
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found::<R>(id))
    }

    fn update(&self, record: &R) -> Result<()> {
        lock_unpoisoned(&self.inner, R::COLLECTION).update(record)
    }

    fn update_field(&self, id: u64, field: R::Field) -> Result<()> {
        lock_unpoisoned(&self.inner, R::COLLECTION).update_field(id, field)
    }

    fn list(&self) -> Result<Vec<R>> {
        Ok(lock_unpoisoned(&self.inner, R::COLLECTION).list())
    }

    fn delete(&self, id: u64) -> Result<()> {
        lock_unpoisoned(&self.inner, R::COLLECTION).delete(id)
    }
}

/// One JSON file per record under `<dir>/<collection>/`.
///
/// Mutations update memory and hand the serialized record to a writer
/// thread, so callers never wait on file I/O. Queue order follows mutation
/// order; each file is replaced atomically. Dropping the store, or calling
/// [`flush`](RecordStore::flush), waits until the queue is on disk.
pub struct JsonFileStore<R> {
    inner: Mutex<Collection<R>>,
    tx: Option<mpsc::Sender<WriteCmd>>,
    writer: Option<JoinHandle<()>>,
}

enum WriteCmd {
    Put { id: u64, data: Vec<u8> },
    Remove { id: u64 },
    Flush(mpsc::SyncSender<()>),
}

impl<R: Record> JsonFileStore<R> {
    /// Open `<dir>/<collection>/`, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        let dir = dir.join(R::COLLECTION);
        std::fs::create_dir_all(&dir)?;
        let mut records = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(&path)?;
            let record: R = serde_json::from_slice(&data)
                .map_err(|e| VigilError::Store(format!("corrupt record '{}': {e}", path.display())))?;
            records.insert(record.id(), record);
        }
        tracing::debug!(collection = R::COLLECTION, records = records.len(), "opened record store");

        let (tx, rx) = mpsc::channel();
        let writer = std::thread::Builder::new()
            .name(format!("store-{}", R::COLLECTION))
            .spawn(move || run_writer(dir, R::COLLECTION, rx))?;
        Ok(Self {
            inner: Mutex::new(Collection::new(records)),
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Collection<R>) -> Result<(T, WriteCmd)>) -> Result<T> {
        let mut inner = lock_unpoisoned(&self.inner, R::COLLECTION);
        let (out, cmd) = f(&mut inner)?;
        self.queue(cmd)?;
        Ok(out)
    }

    fn put(collection: &Collection<R>, id: u64) -> Result<WriteCmd> {
        let record = collection.records.get(&id).ok_or_else(|| not_found::<R>(id))?;
        Ok(WriteCmd::Put {
            id,
            data: serde_json::to_vec(record)?,
        })
    }

    fn queue(&self, cmd: WriteCmd) -> Result<()> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.send(cmd).ok())
            .ok_or_else(|| VigilError::Store(format!("writer for '{}' has stopped", R::COLLECTION)))
    }
}

impl<R> Drop for JsonFileStore<R> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                tracing::error!("record store writer panicked");
            }
        }
    }
}

/// Apply queued writes in batches. Within a batch only the last write per
/// record reaches the disk.
fn run_writer(dir: PathBuf, collection: &'static str, rx: mpsc::Receiver<WriteCmd>) {
    while let Ok(first) = rx.recv() {
        let mut pending: BTreeMap<u64, Option<Vec<u8>>> = BTreeMap::new();
        let mut waiting = Vec::new();
        for cmd in std::iter::once(first).chain(std::iter::from_fn(|| rx.try_recv().ok())) {
            match cmd {
                WriteCmd::Put { id, data } => {
                    pending.insert(id, Some(data));
                }
                WriteCmd::Remove { id } => {
                    pending.insert(id, None);
                }
                WriteCmd::Flush(ack) => waiting.push(ack),
            }
        }
        for (id, data) in pending {
            let path = dir.join(format!("{id}.json"));
            let written = match data {
                Some(data) => write_atomic(&path, &data),
                None => match std::fs::remove_file(&path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                },
            };
            if let Err(e) = written {
                tracing::warn!(collection, id, error = %e, "failed to write record");
            }
        }
        for ack in waiting {
            let _ = ack.send(());
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

impl<R: Record> RecordStore<R> for JsonFileStore<R> {
    fn create(&self, record: &mut R) -> Result<()> {
        self.mutate(|c| {
            c.create(record);
            Ok(((), Self::put(c, record.id())?))
        })
    }

    fn get(&self, id: u64) -> Result<R> {
        lock_unpoisoned(&self.inner, R::COLLECTION)
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found::<R>(id))
    }

    fn update(&self, record: &R) -> Result<()> {
        self.mutate(|c| {
            c.update(record)?;
            Ok(((), Self::put(c, record.id())?))
        })
    }

    fn update_field(&self, id: u64, field: R::Field) -> Result<()> {
        self.mutate(|c| {
            c.update_field(id, field)?;
            Ok(((), Self::put(c, id)?))
        })
    }

    fn list(&self) -> Result<Vec<R>> {
        Ok(lock_unpoisoned(&self.inner, R::COLLECTION).list())
    }

    fn delete(&self, id: u64) -> Result<()> {
        self.mutate(|c| {
            c.delete(id)?;
            Ok(((), WriteCmd::Remove { id }))
        })
    }

    fn flush(&self) -> Result<()> {
        let (ack, done) = mpsc::sync_channel(1);
        self.queue(WriteCmd::Flush(ack))?;
        done.recv()
            .map_err(|_| VigilError::Store(format!("writer for '{}' has stopped", R::COLLECTION)))
    }
}
