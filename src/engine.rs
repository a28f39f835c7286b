use std::{
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Errors raised by the embedded key-value engine.
#[derive(Debug)]
pub enum EngineError {
    EmptyKey,
    Closed,
    Io(io::Error),
    Sled(sled::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "key cannot be empty"),
            Self::Closed => write!(f, "engine is closed"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Sled(e) => write!(f, "sled error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Sled(e) => Some(e),
            Self::EmptyKey | Self::Closed => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<sled::Error> for EngineError {
    fn from(value: sled::Error) -> Self {
        Self::Sled(value)
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory holding the engine files.
    pub dir: PathBuf,
    /// Create `dir` on open when it does not exist.
    pub create_if_missing: bool,
}

/// Durable ordered byte-key store backed by sled.
///
/// The handle is cheap to clone; all clones share the underlying tree and the
/// closed flag. Writes flush before returning, so anything acknowledged here
/// survives a crash. The Raft apply task is the only writer at runtime;
/// readers may run concurrently.
#[derive(Debug, Clone)]
pub struct KvEngine {
    db: sled::Db,
    closed: Arc<AtomicBool>,
}

impl KvEngine {
    pub fn open(opts: EngineOptions) -> Result<Self, EngineError> {
        if !opts.dir.exists() {
            if !opts.create_if_missing {
                return Err(EngineError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("engine directory does not exist: {}", opts.dir.display()),
                )));
            }
            std::fs::create_dir_all(&opts.dir)?;
        }

        let db = sled::open(&opts.dir)?;
        Ok(Self {
            db,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.check_usable(key)?;
        let value = self.db.get(key)?;
        Ok(value.map(|v| v.to_vec()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.check_usable(key)?;
        self.db.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Deleting an absent key succeeds.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.check_usable(key)?;
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    /// Flushes and marks the handle closed. Idempotent; later operations on
    /// this handle or any clone fail with `EngineError::Closed`.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }

    fn check_usable(&self, key: &[u8]) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        Ok(())
    }
}
