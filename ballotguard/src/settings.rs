use crate::*;
use std::env::var;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_DATA_DIR: &str = "./ballotguard_data";
pub const DEFAULT_TENANT: &str = "default";

/// Where records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    LocalStorage,
}

impl FromStr for StorageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageMode::Memory),
            "local_storage" | "local" | "file" => Ok(StorageMode::LocalStorage),
            other => Err(Error::InvalidArgument(format!("unknown storage mode {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub storage_mode: StorageMode,
    pub data_dir: PathBuf,
    pub workers: usize,
    pub tenant: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            storage_mode: StorageMode::LocalStorage,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            workers: default_workers(),
            tenant: DEFAULT_TENANT.to_owned(),
        }
    }
}

impl Settings {
    /// Read settings from `BALLOTGUARD_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| var(name).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset names
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let storage_mode = match lookup("BALLOTGUARD_STORAGE_MODE") {
            Some(val) => val.parse()?,
            None => defaults.storage_mode,
        };

        let data_dir = match lookup("BALLOTGUARD_DATA_DIR") {
            Some(val) => PathBuf::from(val),
            None => defaults.data_dir,
        };

        let workers = match lookup("BALLOTGUARD_WORKERS") {
            Some(val) => match val.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "BALLOTGUARD_WORKERS must be a positive number, got {}",
                        val
                    )))
                }
            },
            None => defaults.workers,
        };

        let tenant = lookup("BALLOTGUARD_TENANT").unwrap_or(defaults.tenant);
        Tenant::new(&tenant)?;

        Ok(Settings {
            storage_mode,
            data_dir,
            workers,
            tenant,
        })
    }

    pub fn tenant(&self) -> Result<Tenant, Error> {
        Tenant::new(&self.tenant)
    }

    /// Open the repository the settings describe
    pub fn repository(&self) -> Result<Arc<dyn Repository>, Error> {
        match self.storage_mode {
            StorageMode::Memory => Ok(Arc::new(MemRepository::new())),
            StorageMode::LocalStorage => {
                let repo = FileRepository::open(&self.data_dir)?;
                log::debug!("using local storage at {}", self.data_dir.display());
                Ok(Arc::new(repo))
            }
        }
    }

    pub fn scheduler(&self) -> Result<Arc<Scheduler>, Error> {
        Ok(Arc::new(Scheduler::new(self.workers)?))
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.storage_mode, StorageMode::LocalStorage);
        assert_eq!(settings.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(settings.tenant, DEFAULT_TENANT);
        assert!(settings.workers >= 1);
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("BALLOTGUARD_STORAGE_MODE", "MEMORY"),
            ("BALLOTGUARD_WORKERS", "3"),
            ("BALLOTGUARD_TENANT", "county-7"),
        ]))
        .unwrap();
        assert_eq!(settings.storage_mode, StorageMode::Memory);
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.tenant().unwrap().as_str(), "county-7");
        assert!(settings.repository().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        for vars in &[
            [("BALLOTGUARD_STORAGE_MODE", "cloud")],
            [("BALLOTGUARD_WORKERS", "0")],
            [("BALLOTGUARD_WORKERS", "many")],
            [("BALLOTGUARD_TENANT", "../etc")],
        ] {
            let err = Settings::from_lookup(lookup(vars)).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn local_storage_opens_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage_mode: StorageMode::LocalStorage,
            data_dir: dir.path().to_path_buf(),
            workers: 1,
            tenant: DEFAULT_TENANT.to_owned(),
        };
        assert!(settings.repository().is_ok());
        let scheduler = settings.scheduler().unwrap();
        assert_eq!(scheduler.workers(), 1);
        scheduler.shutdown();
    }
}
