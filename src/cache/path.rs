use std::env;
use std::path::{Path, PathBuf};

pub const ENV_SCRATCH_DIR: &str = "REUSECACHE_SCRATCH_DIR";

/// Directory under which per-process spill directories are created.
pub fn scratch_root(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    if let Ok(custom) = env::var(ENV_SCRATCH_DIR) {
        return PathBuf::from(custom);
    }
    env::temp_dir()
}

pub fn spill_file(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.mtx"))
}
