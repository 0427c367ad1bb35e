use std::sync::Once;
use std::{env, fs, path::Path, path::PathBuf};

use crate::errors::Result;

const DEFAULT_DIR_NAME: &str = ".pocketbook";

static TRACING_INIT: Once = Once::new();

/// Initializes the global tracing subscriber with sensible defaults.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter =
            EnvFilter::from_default_env().add_directive("pocketbook_core=info".parse().unwrap());

        fmt().with_env_filter(filter).init();
        tracing::info!("Pocketbook Core tracing initialized.");
    });
}

/// Returns the application-specific data directory, defaulting to `~/.pocketbook`.
pub fn app_data_dir() -> PathBuf {
    if let Some(custom) = env::var_os("POCKETBOOK_HOME") {
        return PathBuf::from(custom);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}

/// Creates the directory (and parents) when it does not already exist.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
