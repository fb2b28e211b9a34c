//! Environment-configuration overlay file
//!
//! A deployment can point `KAPETA_CONFIG_PATH` at a JSON file holding a flat
//! string map. Providers consult it whenever a named environment variable is
//! not set in the process environment.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

const KAPETA_CONFIG_PATH: &str = "KAPETA_CONFIG_PATH";

/// Reads the overlay map from the file named by `KAPETA_CONFIG_PATH`.
///
/// Returns an empty map when the variable is unset; an unreadable or
/// malformed file is an explicit error.
pub fn read_config_file() -> Result<HashMap<String, String>> {
    let path = match env::var(KAPETA_CONFIG_PATH) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => return Ok(HashMap::new()),
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
        path: path.clone(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::FileParse {
        path,
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{env_lock, EnvGuard};
    use std::io::Write;

    #[test]
    fn unset_path_yields_empty_map() {
        let _lock = env_lock();
        let _cleared = EnvGuard::remove(KAPETA_CONFIG_PATH);

        assert!(read_config_file().unwrap().is_empty());
    }

    #[test]
    fn reads_the_named_file() {
        let _lock = env_lock();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"KAPETA_PROVIDER_HOST": "10.0.0.9"}}"#).unwrap();
        let _path = EnvGuard::set(KAPETA_CONFIG_PATH, file.path().to_str().unwrap());

        let map = read_config_file().unwrap();
        assert_eq!(map.get("KAPETA_PROVIDER_HOST").map(String::as_str), Some("10.0.0.9"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let _lock = env_lock();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not-json").unwrap();
        let _path = EnvGuard::set(KAPETA_CONFIG_PATH, file.path().to_str().unwrap());

        assert!(matches!(
            read_config_file(),
            Err(ConfigError::FileParse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let _lock = env_lock();
        let _path = EnvGuard::set(KAPETA_CONFIG_PATH, "/nonexistent/kapeta-config.json");

        assert!(matches!(read_config_file(), Err(ConfigError::FileRead { .. })));
    }
}
