//! Persistent profile stores.
//!
//! Profiles live in two independent JSON documents: a per-user store under
//! the home directory and a read-mostly system store under the installation
//! prefix. Reads consult the user store first and fall back to the system
//! store; writes go to the user store unless a level is named explicitly.
//!
//! Writes are atomic (serialize to a temporary file in the same directory,
//! sync, rename) and concurrent writers serialize on an advisory file lock,
//! so a crashed or racing `profile edit` can never tear the document.

use crate::constants::{SYSTEM_PREFIX, SYSTEM_STORE_FILE, USER_STORE_DIR, USER_STORE_FILE};
use crate::error::{Error, Result};
use crate::profile::Profile;
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One of the two storage levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLevel {
    /// Per-user store; holds the selection marker.
    User,
    /// Installation-wide store, usually read-only at runtime.
    System,
}

impl std::fmt::Display for StorageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::System => write!(f, "system"),
        }
    }
}

/// On-disk document of one storage level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Name of the selected profile, if any. Only meaningful in the user
    /// store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    /// Profiles, kept sorted by name for diffable dumps.
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl StoreDocument {
    fn find(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.name == name)
    }

    fn sort(&mut self) {
        self.profiles.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// Two-level profile store handle.
///
/// Commands receive an explicit `ProfileStore` value; there is no global
/// store state in the process.
pub struct ProfileStore {
    user_path: PathBuf,
    system_path: PathBuf,
}

impl ProfileStore {
    /// Opens the default stores for this user and installation.
    pub fn open() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Internal("cannot determine the home directory".to_string())
        })?;
        Ok(Self::with_paths(
            home.join(USER_STORE_DIR).join(USER_STORE_FILE),
            Path::new(SYSTEM_PREFIX)
                .join("e4s_cl")
                .join(SYSTEM_STORE_FILE),
        ))
    }

    /// Opens stores backed by explicit document paths.
    pub fn with_paths(user_path: PathBuf, system_path: PathBuf) -> Self {
        Self {
            user_path,
            system_path,
        }
    }

    fn path(&self, level: StorageLevel) -> &Path {
        match level {
            StorageLevel::User => &self.user_path,
            StorageLevel::System => &self.system_path,
        }
    }

    /// Reads the document of a level. A missing file is an empty document.
    pub fn read(&self, level: StorageLevel) -> Result<StoreDocument> {
        let path = self.path(level);
        if !path.exists() {
            return Ok(StoreDocument::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| Error::StorageInit {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| Error::StorageCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Atomically replaces the document of a level: serialize to a
    /// temporary file in the same directory, sync, rename over the old one.
    fn write(&self, level: StorageLevel, mut document: StoreDocument) -> Result<()> {
        let path = self.path(level);
        let dir = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("store path {} has no parent", path.display())))?;
        fs::create_dir_all(dir).map_err(|e| Error::StorageInit {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        document.sort();
        let contents =
            serde_json::to_string_pretty(&document).map_err(|e| Error::Serialization(e.to_string()))?;

        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        let mut temp = File::create(&temp_path).map_err(|e| Error::StorageWrite {
            path: temp_path.clone(),
            reason: e.to_string(),
        })?;
        temp.write_all(contents.as_bytes())
            .and_then(|_| temp.write_all(b"\n"))
            .and_then(|_| temp.sync_all())
            .and_then(|_| fs::rename(&temp_path, path))
            .map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                Error::StorageWrite {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;

        debug!("Wrote {} profile store at {}", level, path.display());
        Ok(())
    }

    /// Runs a read-modify-write transaction on a level under the advisory
    /// lock. The closure edits the document in place; an error leaves the
    /// stored document untouched.
    fn transact<T>(
        &self,
        level: StorageLevel,
        operation: impl FnOnce(&mut StoreDocument) -> Result<T>,
    ) -> Result<T> {
        let _lock = self.lock(level)?;
        let mut document = self.read(level)?;
        let value = operation(&mut document)?;
        self.write(level, document)?;
        Ok(value)
    }

    fn lock(&self, level: StorageLevel) -> Result<StoreLock> {
        let path = self.path(level).with_extension("lock");
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::StorageInit {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::StorageInit {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        file.lock_exclusive().map_err(|e| Error::StorageInit {
            path,
            reason: format!("failed to lock store: {}", e),
        })?;
        Ok(StoreLock { file })
    }

    // =========================================================================
    // Profile Operations
    // =========================================================================

    /// Creates a profile at the given level (user by default).
    pub fn create(&self, profile: Profile, level: StorageLevel) -> Result<()> {
        profile.validate()?;
        self.transact(level, |document| {
            if document.find(&profile.name).is_some() {
                return Err(Error::ProfileExists(profile.name.clone()));
            }
            document.profiles.push(profile);
            Ok(())
        })
    }

    /// Looks up a profile by name, user store first.
    pub fn get(&self, name: &str) -> Result<(Profile, StorageLevel)> {
        for level in [StorageLevel::User, StorageLevel::System] {
            if let Some(profile) = self.read(level)?.find(name) {
                return Ok((profile.clone(), level));
            }
        }
        Err(Error::ProfileNotFound(name.to_string()))
    }

    /// Lists profiles at one level, or at both when `level` is `None`.
    /// A name present at both levels is reported once, from the user store.
    pub fn list(&self, level: Option<StorageLevel>) -> Result<Vec<(Profile, StorageLevel)>> {
        let levels = match level {
            Some(level) => vec![level],
            None => vec![StorageLevel::User, StorageLevel::System],
        };

        let mut seen = std::collections::BTreeSet::new();
        let mut profiles = Vec::new();
        for level in levels {
            for profile in self.read(level)?.profiles {
                if seen.insert(profile.name.clone()) {
                    profiles.push((profile, level));
                }
            }
        }
        Ok(profiles)
    }

    /// Edits the named profile in place, wherever it lives. The edit either
    /// commits atomically or the stored record is left untouched.
    pub fn update(
        &self,
        name: &str,
        operation: impl FnOnce(&mut Profile) -> Result<()>,
    ) -> Result<Profile> {
        let (_, level) = self.get(name)?;
        let renamed = self.transact(level, |document| {
            let selected = document.selected.clone();
            let profile = document
                .find_mut(name)
                .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
            operation(profile)?;
            profile.validate()?;
            let edited = profile.clone();

            if edited.name != name {
                if document.profiles.iter().filter(|p| p.name == edited.name).count() > 1 {
                    return Err(Error::ProfileExists(edited.name.clone()));
                }
                // Follow a rename with the selection marker.
                if selected.as_deref() == Some(name) {
                    document.selected = Some(edited.name.clone());
                }
            }
            Ok(edited)
        })?;
        Ok(renamed)
    }

    /// Deletes a profile. A selected profile must be unselected first.
    pub fn delete(&self, name: &str) -> Result<()> {
        let (_, level) = self.get(name)?;
        if self.selected()?.as_deref() == Some(name) {
            return Err(Error::ProfileSelected(name.to_string()));
        }
        self.transact(level, |document| {
            let before = document.profiles.len();
            document.profiles.retain(|p| p.name != name);
            if document.profiles.len() == before {
                return Err(Error::ProfileNotFound(name.to_string()));
            }
            Ok(())
        })
    }

    /// Copies a profile under a new name into the user store.
    pub fn copy(&self, source: &str, destination: &str) -> Result<()> {
        let (mut profile, _) = self.get(source)?;
        profile.name = destination.to_string();
        self.create(profile, StorageLevel::User)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Marks a profile as selected. The marker always lives in the user
    /// store, even for system-level profiles.
    pub fn select(&self, name: &str) -> Result<()> {
        self.get(name)?;
        self.transact(StorageLevel::User, |document| {
            document.selected = Some(name.to_string());
            Ok(())
        })
    }

    /// Clears the selection marker.
    pub fn unselect(&self) -> Result<()> {
        self.transact(StorageLevel::User, |document| {
            document.selected = None;
            Ok(())
        })
    }

    /// Name of the selected profile. A marker naming a profile that no
    /// longer exists in any store reads as no selection.
    pub fn selected(&self) -> Result<Option<String>> {
        let marker = self.read(StorageLevel::User)?.selected;
        match marker {
            Some(name) if self.get(&name).is_ok() => Ok(Some(name)),
            _ => Ok(None),
        }
    }

    /// The selected profile record.
    pub fn selected_profile(&self) -> Result<Option<Profile>> {
        match self.selected()? {
            Some(name) => Ok(Some(self.get(&name)?.0)),
            None => Ok(None),
        }
    }

    /// Raw pretty-printed document of a level, for `profile dump`.
    pub fn dump(&self, level: StorageLevel) -> Result<String> {
        let mut document = self.read(level)?;
        document.sort();
        serde_json::to_string_pretty(&document).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Advisory lock held for the duration of one store transaction.
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
