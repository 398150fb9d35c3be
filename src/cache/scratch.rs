use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use reusecache_matrix::{MatrixBlock, MatrixError, codec};
use tempfile::TempDir;
use tracing::debug;

/// Local storage used for spill files.
pub trait ScratchStorage: Send {
    /// Creates a directory no other process or run shares.
    fn create_unique_dir(&mut self) -> io::Result<PathBuf>;

    /// Writes `block` to `path`, returning the bytes written.
    fn write_matrix(&self, path: &Path, block: &MatrixBlock) -> Result<u64, MatrixError>;

    fn read_matrix(&self, path: &Path) -> Result<MatrixBlock, MatrixError>;

    /// Deletes `path`; a missing file is not an error.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Drops every directory created so far, together with its files.
    fn release(&mut self) -> io::Result<()>;

    /// Root under which directories are created.
    fn location(&self) -> &Path;
}

/// Scratch space on the local filesystem. Directories are removed on
/// [`ScratchStorage::release`] or when the storage is dropped.
#[derive(Debug)]
pub struct LocalScratch {
    root: PathBuf,
    dirs: Vec<TempDir>,
}

impl LocalScratch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: Vec::new(),
        }
    }
}

impl ScratchStorage for LocalScratch {
    fn create_unique_dir(&mut self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix("reusecache-spill-")
            .tempdir_in(&self.root)?;
        let path = dir.path().to_path_buf();
        self.dirs.push(dir);
        Ok(path)
    }

    fn write_matrix(&self, path: &Path, block: &MatrixBlock) -> Result<u64, MatrixError> {
        codec::write_to_path(path, block)
    }

    fn read_matrix(&self, path: &Path) -> Result<MatrixBlock, MatrixError> {
        codec::read_from_path(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    fn release(&mut self) -> io::Result<()> {
        for dir in self.dirs.drain(..) {
            debug!(dir = %dir.path().display(), "releasing spill directory");
            dir.close()?;
        }
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.root
    }
}
