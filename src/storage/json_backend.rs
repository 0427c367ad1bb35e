use std::{
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use super::KeyValueStore;
use crate::{
    errors::{CoreError, Result},
    utils::{app_data_dir, ensure_dir},
};

const TMP_SUFFIX: &str = "tmp";

/// Disk-backed key-value store keeping one JSON file per key. When the data
/// directory cannot be used the store degrades to an in-memory map so the
/// application keeps working within the session.
pub struct FileStore {
    root: PathBuf,
    fallback: Mutex<Option<HashMap<String, String>>>,
}

impl FileStore {
    /// Opens a store rooted at `root`, defaulting to the application data
    /// directory. Never fails: an unusable directory engages the fallback.
    pub fn open(root: Option<PathBuf>) -> Self {
        let root = root.unwrap_or_else(app_data_dir);
        let fallback = match ensure_dir(&root) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(%err, path = %root.display(), "storage unavailable, falling back to memory");
                Some(HashMap::new())
            }
        };
        Self {
            root,
            fallback: Mutex::new(fallback),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }

    fn degrade(&self, err: &CoreError) -> Result<()> {
        tracing::warn!(%err, "storage write failed, falling back to memory");
        let mut fallback = self
            .fallback
            .lock()
            .map_err(|_| CoreError::Storage("file store poisoned".into()))?;
        if fallback.is_none() {
            *fallback = Some(HashMap::new());
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let fallback = self
                .fallback
                .lock()
                .map_err(|_| CoreError::Storage("file store poisoned".into()))?;
            if let Some(map) = fallback.as_ref() {
                if let Some(value) = map.get(key) {
                    return Ok(Some(value.clone()));
                }
            }
        }
        // Disk is still consulted on a fallback miss so keys persisted
        // earlier in the session stay visible after degrading.
        match fs::read_to_string(self.key_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                let err = CoreError::Storage(err.to_string());
                self.degrade(&err)?;
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let degraded = {
            let fallback = self
                .fallback
                .lock()
                .map_err(|_| CoreError::Storage("file store poisoned".into()))?;
            fallback.is_some()
        };
        if !degraded {
            let path = self.key_path(key);
            match write_atomic(&path, value) {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(&err)?,
            }
        }
        let mut fallback = self
            .fallback
            .lock()
            .map_err(|_| CoreError::Storage("file store poisoned".into()))?;
        if let Some(map) = fallback.as_mut() {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let degraded = {
            let mut fallback = self
                .fallback
                .lock()
                .map_err(|_| CoreError::Storage("file store poisoned".into()))?;
            match fallback.as_mut() {
                Some(map) => {
                    map.remove(key);
                    true
                }
                None => false,
            }
        };
        // The disk copy goes too, or a pre-degrade value would resurface
        // through `get`.
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) if degraded => {
                tracing::debug!(%err, "degraded store could not remove persisted key");
                Ok(())
            }
            Err(err) => Err(CoreError::Storage(err.to_string())),
        }
    }
}

fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            _ => '_',
        })
        .collect();
    if sanitized.trim_matches('_').is_empty() {
        "store".into()
    } else {
        sanitized
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
