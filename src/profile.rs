//! Profile data model.
//!
//! A profile bundles everything needed to reproduce an MPI launch inside a
//! container: the backend, the image, the file and library sets discovered
//! by `profile detect`, an optional setup script and an optional
//! translation-layer installation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// A named, persisted launch configuration.
///
/// Path sets are ordered so serialization is deterministic and repeated
/// edits with the same path collapse to a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique name within a storage level.
    pub name: String,

    /// Container backend technology.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Backend-specific image identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Shared objects to make available in the container.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub libraries: BTreeSet<PathBuf>,

    /// Files and directories to bind in place.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub files: BTreeSet<PathBuf>,

    /// Script sourced in the container before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    /// Root of a translation-layer installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wi4mpi: Option<PathBuf>,

    /// Options forwarded to the translation-layer launcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wi4mpi_options: Option<String>,
}

impl Profile {
    /// Creates an empty profile with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks the data model invariants: non-empty name, and no path listed
    /// both as a library and as a file.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidProfile {
                name: self.name.clone(),
                reason: "empty name".to_string(),
            });
        }

        if let Some(shared) = self.libraries.intersection(&self.files).next() {
            return Err(Error::InvalidProfile {
                name: self.name.clone(),
                reason: format!(
                    "path {} appears in both libraries and files",
                    shared.display()
                ),
            });
        }

        Ok(())
    }

    /// Applies an edit, validating the result. On error the profile is left
    /// untouched.
    pub fn apply(&mut self, patch: &ProfilePatch) -> Result<()> {
        let mut edited = self.clone();

        if let Some(name) = &patch.rename {
            edited.name = name.clone();
        }
        if let Some(backend) = &patch.backend {
            edited.backend = Some(backend.clone());
        }
        if let Some(image) = &patch.image {
            edited.image = Some(image.clone());
        }
        if let Some(source) = &patch.source {
            edited.source = Some(source.clone());
        }
        if let Some(root) = &patch.wi4mpi {
            edited.wi4mpi = Some(root.clone());
        }
        if let Some(options) = &patch.wi4mpi_options {
            edited.wi4mpi_options = Some(options.clone());
        }

        edited.libraries.extend(patch.add_libraries.iter().cloned());
        edited.files.extend(patch.add_files.iter().cloned());
        for path in &patch.remove_libraries {
            edited.libraries.remove(path);
        }
        for path in &patch.remove_files {
            edited.files.remove(path);
        }

        edited.validate()?;
        *self = edited;
        Ok(())
    }

    /// Field-wise differences against another profile.
    pub fn diff(&self, other: &Self) -> Vec<FieldDiff> {
        let mut diffs = Vec::new();

        let mut scalar = |field: &'static str, lhs: Option<String>, rhs: Option<String>| {
            if lhs != rhs {
                diffs.push(FieldDiff {
                    field,
                    left: lhs,
                    right: rhs,
                });
            }
        };

        scalar("backend", self.backend.clone(), other.backend.clone());
        scalar("image", self.image.clone(), other.image.clone());
        scalar(
            "source",
            self.source.as_ref().map(|p| p.display().to_string()),
            other.source.as_ref().map(|p| p.display().to_string()),
        );
        scalar(
            "wi4mpi",
            self.wi4mpi.as_ref().map(|p| p.display().to_string()),
            other.wi4mpi.as_ref().map(|p| p.display().to_string()),
        );
        scalar(
            "wi4mpi_options",
            self.wi4mpi_options.clone(),
            other.wi4mpi_options.clone(),
        );

        for path in self.libraries.difference(&other.libraries) {
            diffs.push(FieldDiff {
                field: "libraries",
                left: Some(path.display().to_string()),
                right: None,
            });
        }
        for path in other.libraries.difference(&self.libraries) {
            diffs.push(FieldDiff {
                field: "libraries",
                left: None,
                right: Some(path.display().to_string()),
            });
        }
        for path in self.files.difference(&other.files) {
            diffs.push(FieldDiff {
                field: "files",
                left: Some(path.display().to_string()),
                right: None,
            });
        }
        for path in other.files.difference(&self.files) {
            diffs.push(FieldDiff {
                field: "files",
                left: None,
                right: Some(path.display().to_string()),
            });
        }

        diffs
    }
}

/// One edit to apply to a profile.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub rename: Option<String>,
    pub backend: Option<String>,
    pub image: Option<String>,
    pub source: Option<PathBuf>,
    pub wi4mpi: Option<PathBuf>,
    pub wi4mpi_options: Option<String>,
    pub add_libraries: Vec<PathBuf>,
    pub remove_libraries: Vec<PathBuf>,
    pub add_files: Vec<PathBuf>,
    pub remove_files: Vec<PathBuf>,
}

impl ProfilePatch {
    /// True when the patch carries no edits.
    pub fn is_empty(&self) -> bool {
        self.rename.is_none()
            && self.backend.is_none()
            && self.image.is_none()
            && self.source.is_none()
            && self.wi4mpi.is_none()
            && self.wi4mpi_options.is_none()
            && self.add_libraries.is_empty()
            && self.remove_libraries.is_empty()
            && self.add_files.is_empty()
            && self.remove_files.is_empty()
    }
}

/// One differing field between two profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: &'static str,
    pub left: Option<String>,
    pub right: Option<String>,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.left, &self.right) {
            (Some(l), Some(r)) => write!(f, "~ {}: {} -> {}", self.field, l, r),
            (Some(l), None) => write!(f, "< {}: {}", self.field, l),
            (None, Some(r)) => write!(f, "> {}: {}", self.field, r),
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_disjoint_sets() {
        let mut profile = Profile::new("p");
        profile.libraries.insert(PathBuf::from("/lib/x.so.1"));
        profile.files.insert(PathBuf::from("/lib/x.so.1"));
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_apply_deduplicates_libraries() {
        let mut profile = Profile::new("p");
        let patch = ProfilePatch {
            add_libraries: vec![PathBuf::from("/lib/x.so.1"), PathBuf::from("/lib/x.so.1")],
            ..Default::default()
        };
        profile.apply(&patch).unwrap();
        profile.apply(&patch).unwrap();
        assert_eq!(profile.libraries.len(), 1);
    }

    #[test]
    fn test_apply_rolls_back_on_invalid() {
        let mut profile = Profile::new("p");
        profile.files.insert(PathBuf::from("/etc/hosts"));
        let patch = ProfilePatch {
            add_libraries: vec![PathBuf::from("/etc/hosts")],
            ..Default::default()
        };
        assert!(profile.apply(&patch).is_err());
        assert!(profile.libraries.is_empty());
    }

    #[test]
    fn test_diff_reports_scalars_and_sets() {
        let mut a = Profile::new("a");
        a.backend = Some("podman".to_string());
        a.libraries.insert(PathBuf::from("/lib/only-in-a.so"));
        let mut b = Profile::new("b");
        b.backend = Some("shifter".to_string());

        let diffs = a.diff(&b);
        assert!(diffs.iter().any(|d| d.field == "backend"));
        assert!(diffs
            .iter()
            .any(|d| d.field == "libraries" && d.right.is_none()));
    }
}
