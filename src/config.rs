use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RowmapConfig {
    pub database: Option<String>,
    /// Authority segment of change URIs
    pub authority: Option<String>,
    pub log_sql: Option<bool>,
}

impl RowmapConfig {
    /// Database file, relative paths resolved against `base`
    pub fn database_path(&self, base: &Path) -> PathBuf {
        match &self.database {
            Some(db) => base.join(db),
            None => default_database_path_in(base),
        }
    }

    /// Reject settings that would produce unusable change URIs.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(authority) = &self.authority {
            if authority.is_empty() || authority.contains(['/', '?', '#']) || authority.contains(char::is_whitespace) {
                return Err(Error::Configuration(format!("invalid authority {:?}", authority)));
            }
        }
        if self.database.as_deref() == Some("") {
            return Err(Error::Configuration("database path is empty".into()));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("rowmap.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".rowmap").join("rowmap.db")
}

fn config_error(path: &Path, message: impl std::fmt::Display) -> Error {
    Error::Configuration(format!("{}: {}", path.display(), message))
}

/// Read and validate `path` (default `rowmap.toml`); a missing file is `None`.
pub fn load_config(path: Option<&Path>) -> crate::Result<Option<RowmapConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let config: RowmapConfig = toml::from_str(&contents).map_err(|e| config_error(&path, e))?;
    config.validate().map_err(|e| match e {
        Error::Configuration(message) => config_error(&path, message),
        other => other,
    })?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &RowmapConfig, force: bool) -> crate::Result<()> {
    if path.exists() && !force {
        return Err(config_error(path, "already exists (use --force to overwrite)"));
    }
    config.validate()?;

    let contents = toml::to_string_pretty(config).map_err(|e| config_error(path, e))?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> crate::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
