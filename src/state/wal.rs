use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{P2pError, Result};
use crate::state::msg_info::MsgInfo;

/// Largest record accepted when reading the log back
const MAX_RECORD_SIZE: usize = 10 * 1024 * 1024;

/// Entry of the write-ahead log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalMessage {
    /// Opaque consensus message
    Message(Vec<u8>),

    /// Marks that every message of `height` has been written
    EndHeight(i64),
}

impl WalMessage {
    /// Validate and encode a message for the log
    pub fn from_msg<M: MsgInfo + Serialize>(msg: &M) -> Result<Self> {
        msg.validate()?;
        Ok(WalMessage::Message(bincode::serialize(msg)?))
    }
}

/// Write-ahead log consumed by the consensus state machine
pub trait Wal: Send + Sync {
    /// Append without forcing it to disk
    fn write(&self, msg: &WalMessage) -> Result<()>;

    /// Append and fsync
    fn write_sync(&self, msg: &WalMessage) -> Result<()>;

    fn flush_and_sync(&self) -> Result<()>;

    /// Reader positioned just after the `EndHeight(height)` marker, if any
    fn search_for_end_height(&self, height: i64) -> Result<Option<WalReader>>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Block until `stop` has completed
    fn wait(&self);
}

/// Sequential reader over log records
pub struct WalReader {
    reader: BufReader<File>,
}

impl WalReader {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Next record, or `None` at a clean end of the log
    pub fn read_next(&mut self) -> Result<Option<WalMessage>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(P2pError::Wal(format!("record of {} bytes exceeds limit", len)));
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => P2pError::Wal("truncated record".to_string()),
            _ => P2pError::Io(e),
        })?;

        Ok(Some(bincode::deserialize(&body)?))
    }
}

impl Iterator for WalReader {
    type Item = Result<WalMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Single-file write-ahead log of length-prefixed bincode records
pub struct FileWal {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    stopped: Mutex<bool>,
    stopped_cond: Condvar,
}

impl FileWal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
            stopped: Mutex::new(false),
            stopped_cond: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(writer: &mut BufWriter<File>, msg: &WalMessage) -> Result<()> {
        let body = bincode::serialize(msg)?;
        writer.write_all(&(body.len() as u32).to_be_bytes())?;
        writer.write_all(&body)?;
        Ok(())
    }

    fn sync(writer: &mut BufWriter<File>) -> Result<()> {
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl Wal for FileWal {
    fn write(&self, msg: &WalMessage) -> Result<()> {
        let mut guard = self.writer();
        let writer = guard
            .as_mut()
            .ok_or_else(|| P2pError::Wal("not started".to_string()))?;
        Self::append(writer, msg)
    }

    fn write_sync(&self, msg: &WalMessage) -> Result<()> {
        let mut guard = self.writer();
        let writer = guard
            .as_mut()
            .ok_or_else(|| P2pError::Wal("not started".to_string()))?;
        Self::append(writer, msg)?;
        Self::sync(writer)
    }

    fn flush_and_sync(&self) -> Result<()> {
        match self.writer().as_mut() {
            Some(writer) => Self::sync(writer),
            None => Ok(()),
        }
    }

    fn search_for_end_height(&self, height: i64) -> Result<Option<WalReader>> {
        if !self.path.exists() {
            return Ok(None);
        }

        // Make buffered records visible to the reader
        if let Some(writer) = self.writer().as_mut() {
            writer.flush()?;
        }

        let mut reader = WalReader::open(&self.path)?;
        while let Some(msg) = reader.read_next()? {
            if msg == WalMessage::EndHeight(height) {
                debug!("Found end of height {} in {}", height, self.path.display());
                return Ok(Some(reader));
            }
        }
        Ok(None)
    }

    fn start(&self) -> Result<()> {
        let mut guard = self.writer();
        if guard.is_some() {
            return Err(P2pError::Wal("already started".to_string()));
        }

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *guard = Some(BufWriter::new(file));
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = false;

        info!("WAL opened at {}", self.path.display());
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let result = match self.writer().take() {
            Some(mut writer) => Self::sync(&mut writer),
            None => {
                warn!("WAL at {} stopped before start", self.path.display());
                Ok(())
            }
        };

        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.stopped_cond.notify_all();
        result
    }

    fn wait(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            stopped = self
                .stopped_cond
                .wait(stopped)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
