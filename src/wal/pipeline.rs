// Background preallocation of WAL segment files.
//
// Grounded on `original_source/utils/api/wal/file_pipeline.go`: a
// background worker keeps one spare, preallocated, advisory-locked file
// ready in `<dir>/<n>.tmp` so cutting to a new segment never blocks on
// `fallocate`. Reworked from the Go version's unbuffered channel +
// goroutine into a `std::thread` + `mpsc` pair, since the WAL's own
// writes are synchronous blocking I/O rather than async tasks.

use crate::error::{NodeError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

pub struct FilePipeline {
    file_rx: Receiver<Result<(PathBuf, File)>>,
    stop_tx: SyncSender<()>,
    worker: Option<JoinHandle<()>>,
}

impl FilePipeline {
    pub fn new(dir: PathBuf, segment_size: u64) -> Self {
        let (file_tx, file_rx) = sync_channel(1);
        let (stop_tx, stop_rx) = sync_channel(0);
        let worker = std::thread::spawn(move || run(dir, segment_size, file_tx, stop_rx));
        Self { file_rx, stop_tx, worker: Some(worker) }
    }

    /// Take the next preallocated file, blocking until the background
    /// worker has one ready. Callers must rename it into place before
    /// calling `open` again or the next preallocation will collide.
    pub fn open(&self) -> Result<(PathBuf, File)> {
        self.file_rx
            .recv()
            .map_err(|_| NodeError::Wal("file pipeline worker exited".to_string()))?
    }
}

impl Drop for FilePipeline {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    dir: PathBuf,
    segment_size: u64,
    file_tx: SyncSender<Result<(PathBuf, File)>>,
    stop_rx: Receiver<()>,
) {
    let mut count: u64 = 0;
    loop {
        let result = alloc(&dir, segment_size, count);
        count += 1;
        let is_err = result.is_err();
        if file_tx.send(result).is_err() || is_err {
            return;
        }
        if stop_rx.try_recv().is_ok() {
            return;
        }
    }
}

fn alloc(dir: &PathBuf, segment_size: u64, count: u64) -> Result<(PathBuf, File)> {
    let path = dir.join(format!("{}.tmp", count % 2));
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
    file.try_lock_exclusive()
        .map_err(|e| NodeError::Wal(format!("failed to lock {}: {e}", path.display())))?;
    file.allocate(segment_size)
        .map_err(|e| NodeError::Wal(format!("failed to preallocate {}: {e}", path.display())))?;
    Ok((path, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_a_preallocated_locked_file() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FilePipeline::new(dir.path().to_path_buf(), 1024 * 1024);
        let (path, file) = pipeline.open().unwrap();
        assert!(path.exists());
        assert_eq!(file.metadata().unwrap().len(), 1024 * 1024);
    }
}
