use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// PID file guarding against a second instance. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Records this process in `path`, unless the process recorded there
    /// is still alive.
    pub fn create(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let recorded = text.lines().next().unwrap_or("").trim();
                if let Ok(pid) = recorded.parse::<i32>() {
                    if Path::new("/proc").join(recorded).is_dir() {
                        return Err(Error::AlreadyRunning { pid });
                    }
                    debug!(pid, "stale pid file");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
