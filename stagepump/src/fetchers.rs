//! Built-in [`Fetcher`] implementations.
//!
//! | Fetcher         | Source            | `fetch()` behaviour              |
//! |-----------------|-------------------|----------------------------------|
//! | [`MemoryFetcher`] | in-memory bytes | no-op                            |
//! | [`FileFetcher`]   | file path       | re-reads the file on every call  |
//! | [`LazyFetcher`]   | loader closure  | loads on the first call only     |

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::trace;

use crate::error::StageError;
use crate::traits::Fetcher;

// =============================================================================
// Memory
// =============================================================================

/// Fetcher over a payload already held in memory.
///
/// Cloning the underlying [`Bytes`] is cheap, so the same payload can back
/// many jobs.
#[derive(Debug, Clone)]
pub struct MemoryFetcher {
    data: Bytes,
}

impl MemoryFetcher {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn materialize(&mut self) -> Result<&[u8], StageError> {
        Ok(&self.data)
    }
}

// =============================================================================
// File
// =============================================================================

/// Fetcher reading a file from disk.
///
/// Each [`fetch`](Fetcher::fetch) re-reads the file, so a fetcher reused
/// across jobs always sees the current contents.
#[derive(Debug)]
pub struct FileFetcher {
    path: PathBuf,
    data: Option<Bytes>,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&mut self) -> Result<(), StageError> {
        let contents = fs::read(&self.path)?;
        trace!(path = %self.path.display(), bytes = contents.len(), "File fetched");
        self.data = Some(Bytes::from(contents));
        Ok(())
    }

    fn materialize(&mut self) -> Result<&[u8], StageError> {
        self.data.as_deref().ok_or(StageError::NotReady)
    }
}

// =============================================================================
// Lazy
// =============================================================================

/// Fetcher that produces its payload once, from a loader closure.
///
/// Later calls to [`fetch`](Fetcher::fetch) keep the payload from the first
/// successful load. A failed load is retried on the next call.
pub struct LazyFetcher<L> {
    loader: L,
    data: Option<Bytes>,
}

impl<L> LazyFetcher<L>
where
    L: FnMut() -> Result<Bytes, StageError> + Send,
{
    pub fn new(loader: L) -> Self {
        Self { loader, data: None }
    }

    /// Whether the loader has already produced the payload.
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }
}

impl<L> Fetcher for LazyFetcher<L>
where
    L: FnMut() -> Result<Bytes, StageError> + Send,
{
    fn fetch(&mut self) -> Result<(), StageError> {
        if self.data.is_none() {
            self.data = Some((self.loader)()?);
        }
        Ok(())
    }

    fn materialize(&mut self) -> Result<&[u8], StageError> {
        self.data.as_deref().ok_or(StageError::NotReady)
    }
}

impl<L> fmt::Debug for LazyFetcher<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFetcher")
            .field("loaded", &self.data.is_some())
            .finish()
    }
}
