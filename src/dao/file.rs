use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use futures::future::BoxFuture;
use tokio::fs;

use super::{
    KvStore,
    storage::{StorageError, StorageResult},
};

/// Default directory holding the per-device blobs.
const DEFAULT_DATA_DIR: &str = "data";
/// Environment variable that overrides [`DEFAULT_DATA_DIR`].
const DATA_DIR_ENV: &str = "TRACKLINE_DATA_DIR";

#[derive(Debug, Clone)]
/// File-backed blob store keeping one file per key inside a data directory.
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    /// Create a store rooted at the given directory.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Create a store rooted at the configured data directory, taking the
    /// environment override into account.
    pub fn from_env() -> Self {
        let dir = env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Self::new(dir)
    }

    /// Path of the file backing `key`. Keys are flattened to a safe charset
    /// so a key can never escape the data directory.
    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.blob"))
    }
}

impl KvStore for FileKv {
    fn save(&self, key: &str, value: Vec<u8>) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let key = key.to_string();
        Box::pin(async move {
            fs::create_dir_all(&dir)
                .await
                .map_err(|err| StorageError::unavailable(format!("creating `{}`", dir.display()), err))?;
            fs::write(&path, value)
                .await
                .map_err(|err| StorageError::unavailable(format!("writing blob `{key}`"), err))
        })
    }

    fn load(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Vec<u8>>>> {
        let path = self.path_for(key);
        let key = key.to_string();
        Box::pin(async move {
            match fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(StorageError::unavailable(
                    format!("reading blob `{key}`"),
                    err,
                )),
            }
        })
    }

    fn clear(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.path_for(key);
        let key = key.to_string();
        Box::pin(async move {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StorageError::unavailable(
                    format!("clearing blob `{key}`"),
                    err,
                )),
            }
        })
    }
}
