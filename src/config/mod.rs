use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    errors::{CoreError, Result},
    utils::{app_data_dir, ensure_dir},
};

const CONFIG_FILE: &str = "config.json";
const TMP_SUFFIX: &str = "tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub currency: String,
    /// Whether restoring from persistence rewrites records that needed repair.
    pub self_heal_on_load: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_label: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            currency: "EUR".into(),
            self_heal_on_load: true,
            remote_label: None,
        }
    }
}

pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        Self::from_base(app_data_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Result<Self> {
        Self::from_base(base)
    }

    fn from_base(base: PathBuf) -> Result<Self> {
        ensure_dir(&base)?;
        Ok(Self {
            path: base.join(CONFIG_FILE),
        })
    }

    pub fn load(&self) -> Result<Config> {
        if self.path.exists() {
            let data = fs::read_to_string(&self.path)?;
            serde_json::from_str(&data)
                .map_err(|err| CoreError::Storage(format!("configuration unreadable: {err}")))
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let json = serde_json::to_string_pretty(config)
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        let tmp = tmp_path(&self.path);
        write_file(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
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

fn write_file(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        let config = manager.load().expect("load defaults");
        assert_eq!(config.currency, "EUR");
        assert!(config.self_heal_on_load);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let temp = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        let mut config = Config::default();
        config.currency = "USD".into();
        config.remote_label = Some("household".into());
        manager.save(&config).expect("save config");
        let loaded = manager.load().expect("load config");
        assert_eq!(loaded.currency, "USD");
        assert_eq!(loaded.remote_label.as_deref(), Some("household"));
    }
}
