//! Single-writer WAL worker.
//!
//! Appends must hit the log in one strict order without every caller
//! serializing on a lock across an fsync. Callers submit records over a
//! bounded channel to one worker thread that owns the `SegmentWriter`, and
//! block on a per-request reply carrying the assigned composite offset.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;
use tracing::{error, info};

use tokmesh_core::error::{Error, Result};
use tokmesh_durability::wal::{SegmentWriter, WalRecord};
use tokmesh_durability::CompositeOffset;

/// Submission queue depth. Full queue pushes back on callers instead of
/// growing without bound.
const QUEUE_DEPTH: usize = 1024;

enum Command {
    Append {
        record: Box<WalRecord>,
        reply: SyncSender<Result<CompositeOffset>>,
    },
    Flush {
        reply: SyncSender<Result<CompositeOffset>>,
    },
    TotalSize {
        reply: SyncSender<Result<u64>>,
    },
    Close {
        reply: SyncSender<Result<()>>,
    },
}

/// Handle submitting work to the WAL worker. Cheap to clone; all clones
/// feed the same writer thread.
#[derive(Clone)]
pub struct WalHandle {
    tx: SyncSender<Command>,
}

/// Worker thread plus the handle feeding it.
pub struct WalWorker {
    handle: WalHandle,
    join: JoinHandle<()>,
}

impl WalWorker {
    /// Spawn the worker around an opened writer.
    pub fn spawn(writer: SegmentWriter) -> Result<Self> {
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("tokmesh-wal".into())
            .spawn(move || run(writer, rx))
            .map_err(|e| Error::Internal(format!("spawning wal worker: {e}")))?;
        Ok(WalWorker { handle: WalHandle { tx }, join })
    }

    /// Handle for submitting appends.
    pub fn handle(&self) -> WalHandle {
        self.handle.clone()
    }

    /// Seal the active segment and stop the worker.
    pub fn close(self) -> Result<()> {
        let (reply, rx) = sync_channel(1);
        self.handle
            .tx
            .send(Command::Close { reply })
            .map_err(|_| Error::Internal("wal worker already stopped".into()))?;
        let result = rx
            .recv()
            .map_err(|_| Error::Internal("wal worker dropped close reply".into()))?;
        let _ = self.join.join();
        result
    }
}

impl WalHandle {
    /// Append a record, blocking until it is assigned an offset.
    pub fn append(&self, record: WalRecord) -> Result<CompositeOffset> {
        let (reply, rx) = sync_channel(1);
        self.tx
            .send(Command::Append { record: Box::new(record), reply })
            .map_err(|_| Error::Internal("wal worker unavailable".into()))?;
        rx.recv()
            .map_err(|_| Error::Internal("wal worker dropped append reply".into()))?
    }

    /// fsync outstanding appends and return the durable composite offset.
    pub fn sync_durable_offset(&self) -> Result<CompositeOffset> {
        let (reply, rx) = sync_channel(1);
        self.tx
            .send(Command::Flush { reply })
            .map_err(|_| Error::Internal("wal worker unavailable".into()))?;
        rx.recv()
            .map_err(|_| Error::Internal("wal worker dropped flush reply".into()))?
    }

    /// Total bytes across every segment file.
    pub fn total_size(&self) -> Result<u64> {
        let (reply, rx) = sync_channel(1);
        self.tx
            .send(Command::TotalSize { reply })
            .map_err(|_| Error::Internal("wal worker unavailable".into()))?;
        rx.recv()
            .map_err(|_| Error::Internal("wal worker dropped size reply".into()))?
    }
}

fn run(mut writer: SegmentWriter, rx: Receiver<Command>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Append { record, reply } => {
                let _ = reply.send(writer.append(&record));
            }
            Command::Flush { reply } => {
                let result = writer.flush().map(|()| writer.current_offset());
                let _ = reply.send(result);
            }
            Command::TotalSize { reply } => {
                let _ = reply.send(writer.total_size());
            }
            Command::Close { reply } => {
                let _ = reply.send(writer.close());
                info!(target: "tokmesh::wal", "worker stopped");
                return;
            }
        }
    }
    // All handles dropped without a close: seal what we have
    error!(target: "tokmesh::wal", "worker channel closed without shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokmesh_durability::wal::SyncPolicy;

    fn spawn_worker(dir: &std::path::Path) -> WalWorker {
        let writer = SegmentWriter::open(dir, 1024 * 1024, SyncPolicy::None).unwrap();
        WalWorker::spawn(writer).unwrap()
    }

    #[test]
    fn appends_from_many_threads_get_distinct_monotonic_offsets() {
        let dir = tempdir().unwrap();
        let worker = spawn_worker(dir.path());
        let handle = worker.handle();

        let mut joins = Vec::new();
        for t in 0..8 {
            let handle = handle.clone();
            joins.push(std::thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        handle
                            .append(WalRecord::delete(0, &format!("tmss-{t}-{i}"), 0))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<CompositeOffset> =
            joins.into_iter().flat_map(|j| j.join().unwrap()).collect();
        assert_eq!(all.len(), 400);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400, "every append got its own offset");

        worker.close().unwrap();
    }

    #[test]
    fn durable_offset_reflects_appends() {
        let dir = tempdir().unwrap();
        let worker = spawn_worker(dir.path());
        let handle = worker.handle();

        let offset = handle.append(WalRecord::delete(0, "tmss-a", 0)).unwrap();
        let durable = handle.sync_durable_offset().unwrap();
        assert_eq!(durable, offset);
        worker.close().unwrap();
    }

    #[test]
    fn handle_fails_cleanly_after_close() {
        let dir = tempdir().unwrap();
        let worker = spawn_worker(dir.path());
        let handle = worker.handle();
        worker.close().unwrap();
        assert!(handle.append(WalRecord::delete(0, "tmss-a", 0)).is_err());
    }
}
