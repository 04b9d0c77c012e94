//! Layered YAML configuration.
//!
//! Configuration is read from `/etc/e4s-cl/e4s-cl.yaml`, then the install
//! prefix, then `$HOME/.config/e4s-cl.yaml`; later files override earlier
//! ones field by field. Unrecognized keys are reported and ignored; a
//! recognized key holding a value of the wrong shape is a hard error.

use crate::constants::{CONTAINER_DIR, SYSTEM_PREFIX};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Backend names accepted as configuration sub-tables.
const BACKEND_TABLES: &[&str] = &[
    "apptainer",
    "singularity",
    "docker",
    "podman",
    "shifter",
    "barebones",
];

/// Per-backend configuration sub-table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Executable overriding the PATH lookup.
    pub executable: Option<PathBuf>,
    /// Options inserted before the backend subcommand.
    pub options: Vec<String>,
    /// Options inserted after the run/exec subcommand.
    pub run_options: Vec<String>,
}

/// Resolved configuration, read-only after initialization. Commands receive
/// an explicit handle instead of consulting a global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// In-container bind root.
    pub container_directory: String,
    /// Options appended to every launcher invocation.
    pub launcher_options: Vec<String>,
    /// Set `LD_PRELOAD` to the bound libraries in the entry script.
    pub preload_root_libraries: bool,
    /// Silence per-rank log output below the warning level.
    pub disable_ranked_log: bool,
    /// Per-backend sub-tables, keyed by backend name.
    pub backends: BTreeMap<String, BackendOptions>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            container_directory: CONTAINER_DIR.to_string(),
            launcher_options: Vec::new(),
            preload_root_libraries: false,
            disable_ranked_log: false,
            backends: BTreeMap::new(),
        }
    }
}

impl Configuration {
    /// Loads the configuration from the standard file locations.
    pub fn load() -> Result<Self> {
        let mut paths = vec![
            PathBuf::from("/etc/e4s-cl/e4s-cl.yaml"),
            Path::new(SYSTEM_PREFIX).join("e4s-cl.yaml"),
        ];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/e4s-cl.yaml"));
        }
        Self::load_from(&paths)
    }

    /// Loads and merges the given files in order; missing files are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigParse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let overlay = Self::parse(&contents, path)?;
            config.apply(overlay);
        }
        Ok(config)
    }

    /// Parses a single YAML document into a partial configuration.
    pub fn parse(contents: &str, origin: &Path) -> Result<ConfigOverlay> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(contents).map_err(|e| Error::ConfigParse {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut overlay = ConfigOverlay::default();
        let mapping = match doc {
            serde_yaml::Value::Null => return Ok(overlay),
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(Error::ConfigParse {
                    path: origin.to_path_buf(),
                    reason: "top-level value is not a mapping".to_string(),
                })
            }
        };

        for (key, value) in mapping {
            let key = match key.as_str() {
                Some(k) => k.to_string(),
                None => {
                    return Err(Error::ConfigParse {
                        path: origin.to_path_buf(),
                        reason: "non-string key".to_string(),
                    })
                }
            };

            match key.as_str() {
                "container_directory" => {
                    overlay.container_directory = Some(expect_string(&key, &value)?);
                }
                "launcher_options" => {
                    overlay.launcher_options = Some(expect_string_list(&key, &value)?);
                }
                "preload_root_libraries" => {
                    overlay.preload_root_libraries = Some(expect_bool(&key, &value)?);
                }
                "disable_ranked_log" => {
                    overlay.disable_ranked_log = Some(expect_bool(&key, &value)?);
                }
                name if BACKEND_TABLES.contains(&name) => {
                    overlay
                        .backends
                        .insert(key.clone(), parse_backend_table(&key, &value)?);
                }
                unknown => {
                    warn!("Ignoring unrecognized configuration key '{}'", unknown);
                }
            }
        }
        Ok(overlay)
    }

    fn apply(&mut self, overlay: ConfigOverlay) {
        if let Some(dir) = overlay.container_directory {
            self.container_directory = dir;
        }
        if let Some(options) = overlay.launcher_options {
            self.launcher_options = options;
        }
        if let Some(preload) = overlay.preload_root_libraries {
            self.preload_root_libraries = preload;
        }
        if let Some(disable) = overlay.disable_ranked_log {
            self.disable_ranked_log = disable;
        }
        for (name, table) in overlay.backends {
            self.backends.insert(name, table);
        }
    }

    /// The sub-table for a backend, defaulting to an empty one.
    pub fn backend(&self, name: &str) -> BackendOptions {
        self.backends.get(name).cloned().unwrap_or_default()
    }
}

/// Partial configuration read from one file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverlay {
    pub container_directory: Option<String>,
    pub launcher_options: Option<Vec<String>>,
    pub preload_root_libraries: Option<bool>,
    pub disable_ranked_log: Option<bool>,
    pub backends: BTreeMap<String, BackendOptions>,
}

fn expect_string(key: &str, value: &serde_yaml::Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::ConfigValue {
            key: key.to_string(),
            expected: "a string",
        })
}

fn expect_bool(key: &str, value: &serde_yaml::Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| Error::ConfigValue {
        key: key.to_string(),
        expected: "a boolean",
    })
}

fn expect_string_list(key: &str, value: &serde_yaml::Value) -> Result<Vec<String>> {
    let items = value.as_sequence().ok_or_else(|| Error::ConfigValue {
        key: key.to_string(),
        expected: "a list of strings",
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .ok_or_else(|| Error::ConfigValue {
                    key: key.to_string(),
                    expected: "a list of strings",
                })
        })
        .collect()
}

fn parse_backend_table(backend: &str, value: &serde_yaml::Value) -> Result<BackendOptions> {
    let mapping = value.as_mapping().ok_or_else(|| Error::ConfigValue {
        key: backend.to_string(),
        expected: "a mapping",
    })?;

    let mut table = BackendOptions::default();
    for (key, value) in mapping {
        let key = key.as_str().unwrap_or_default();
        let qualified = format!("{}.{}", backend, key);
        match key {
            "executable" => {
                table.executable = Some(PathBuf::from(expect_string(&qualified, value)?));
            }
            "options" => {
                table.options = expect_string_list(&qualified, value)?;
            }
            "run_options" => {
                table.run_options = expect_string_list(&qualified, value)?;
            }
            unknown => {
                warn!(
                    "Ignoring unrecognized configuration key '{}.{}'",
                    backend, unknown
                );
            }
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<ConfigOverlay> {
        Configuration::parse(contents, Path::new("test.yaml"))
    }

    #[test]
    fn test_empty_document() {
        let overlay = parse("").unwrap();
        assert!(overlay.container_directory.is_none());
    }

    #[test]
    fn test_recognized_keys() {
        let overlay = parse(
            "container_directory: /opt/binds\n\
             launcher_options: [\"--tag-output\"]\n\
             preload_root_libraries: true\n",
        )
        .unwrap();
        assert_eq!(overlay.container_directory.as_deref(), Some("/opt/binds"));
        assert_eq!(
            overlay.launcher_options,
            Some(vec!["--tag-output".to_string()])
        );
        assert_eq!(overlay.preload_root_libraries, Some(true));
    }

    #[test]
    fn test_wrong_shape_is_fatal() {
        assert!(parse("launcher_options: not-a-list").is_err());
        assert!(parse("preload_root_libraries: [1]").is_err());
    }

    #[test]
    fn test_unknown_key_ignored() {
        assert!(parse("no_such_key: 3").is_ok());
    }

    #[test]
    fn test_backend_table() {
        let overlay = parse(
            "apptainer:\n\
            \x20 executable: /opt/bin/apptainer\n\
            \x20 options: [\"--quiet\"]\n",
        )
        .unwrap();
        let table = &overlay.backends["apptainer"];
        assert_eq!(
            table.executable.as_deref(),
            Some(Path::new("/opt/bin/apptainer"))
        );
        assert_eq!(table.options, vec!["--quiet"]);
    }
}
