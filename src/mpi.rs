//! MPI family and vendor fingerprinting.
//!
//! The launch front decides whether ABI translation is needed by comparing
//! the host MPI family (from the launcher's `--version` output) against the
//! container's (from an in-image version probe). Families are matched with
//! a small regex table; vendor/version extraction additionally feeds
//! profile naming after `init`.

use regex::RegexBuilder;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// An MPI implementation family, as far as ABI compatibility is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpiFamily {
    OpenMpi,
    Mpich,
    Mvapich,
    Intel,
}

impl MpiFamily {
    /// The canonical family name used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenMpi => "openmpi",
            Self::Mpich => "mpich",
            Self::Mvapich => "mvapich",
            Self::Intel => "intel",
        }
    }

    /// Parses a `--from` argument.
    pub fn from_cli(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openmpi" | "open-mpi" | "ompi" => Some(Self::OpenMpi),
            "mpich" => Some(Self::Mpich),
            "mvapich" | "mvapich2" => Some(Self::Mvapich),
            "intel" | "intelmpi" | "impi" => Some(Self::Intel),
            _ => None,
        }
    }

    /// The name the translation layer knows this family under.
    pub fn translation_name(&self) -> &'static str {
        match self {
            Self::OpenMpi => "OMPI",
            Self::Intel => "INTEL",
            // MVAPICH shares the MPICH ABI.
            Self::Mpich | Self::Mvapich => "MPICH",
        }
    }
}

impl fmt::Display for MpiFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps free-form version text to a family. Patterns are tried in order so
/// the more specific spellings win: Cray MPICH and Hydra builds both
/// resolve to the MPICH family.
pub fn match_family(version_text: &str) -> Option<MpiFamily> {
    const TABLE: &[(&str, MpiFamily)] = &[
        (r"cray\s+mpich", MpiFamily::Mpich),
        (r"hydra", MpiFamily::Mpich),
        (r"mvapich", MpiFamily::Mvapich),
        (r"intel\(r\)\s+mpi|intel\s+mpi", MpiFamily::Intel),
        (r"open\s*mpi|open\s*rte", MpiFamily::OpenMpi),
        (r"mpich", MpiFamily::Mpich),
    ];

    for (pattern, family) in TABLE {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static family pattern");
        if regex.is_match(version_text) {
            return Some(*family);
        }
    }
    None
}

/// Reports the family of a launcher binary from its `--version` output.
pub async fn launcher_family(launcher: &Path) -> Option<MpiFamily> {
    let output = Command::new(launcher)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let family = match_family(&text);
    debug!(
        "Launcher {} reports family {:?}",
        launcher.display(),
        family
    );
    family
}

// =============================================================================
// Vendor Identification
// =============================================================================

/// A vendor and version extracted from MPI library version text, used to
/// derive profile names like `Open_MPI@4.1.2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiIdentifier {
    pub vendor: String,
    pub version: String,
}

impl fmt::Display for MpiIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.vendor.replace(' ', "_"), self.version)
    }
}

/// Vendor keywords and their version extractors, most specific first.
pub fn identify_vendor(version_text: &str) -> Option<MpiIdentifier> {
    type Extractor = fn(&str) -> Option<String>;
    const VENDORS: &[(&str, Extractor)] = &[
        ("Intel(R) MPI", extract_intel_version),
        ("Spectrum MPI", extract_open_mpi_version),
        ("CRAY MPICH", extract_cray_mpich_version),
        ("MVAPICH", extract_mpich_version),
        ("Open MPI", extract_open_mpi_version),
        ("MPICH", extract_mpich_version),
    ];

    for (vendor, extract) in VENDORS {
        if version_text.contains(vendor) {
            let version = extract(version_text).unwrap_or_default();
            return Some(MpiIdentifier {
                vendor: vendor.to_string(),
                version,
            });
        }
    }
    None
}

/// `Intel(R) MPI Library 2019 Update 6 for Linux* OS` → `2019 Update 6`.
fn extract_intel_version(text: &str) -> Option<String> {
    let after = text.split_once("Library")?.1;
    Some(after.split_once("for").map_or(after, |(v, _)| v).trim().to_string())
}

/// `Open MPI v4.0.1, package: ...` → `4.0.1`.
fn extract_open_mpi_version(text: &str) -> Option<String> {
    let after = text.split_once('v')?.1;
    Some(after.split_once(',').map_or(after, |(v, _)| v).trim().to_string())
}

/// `MPICH Version: 3.3b2` → `3.3b2`.
fn extract_mpich_version(text: &str) -> Option<String> {
    let after = text.split_once(':')?.1;
    Some(
        after
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
    )
}

/// `MPI VERSION : CRAY MPICH version 8.1.4 (...)` → `8.1.4`.
fn extract_cray_mpich_version(text: &str) -> Option<String> {
    let after = text.split_once("version")?.1;
    Some(after.split_once('(').map_or(after, |(v, _)| v).trim().to_string())
}

/// Appends a `-N` ordinal when `name` collides with an existing one.
pub fn suffix_name(name: &str, existing: &BTreeSet<String>) -> String {
    if !existing.contains(name) {
        return name.to_string();
    }

    let prefix = format!("{}-", name);
    let next = existing
        .iter()
        .filter_map(|candidate| candidate.strip_prefix(&prefix))
        .filter_map(|ordinal| ordinal.parse::<u32>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(2);

    format!("{}-{}", name, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_table() {
        assert_eq!(match_family("Open MPI v4.1.2"), Some(MpiFamily::OpenMpi));
        assert_eq!(match_family("HYDRA build details:"), Some(MpiFamily::Mpich));
        assert_eq!(match_family("MVAPICH2 Version"), Some(MpiFamily::Mvapich));
        assert_eq!(
            match_family("MPI VERSION : CRAY MPICH version 8.1.4"),
            Some(MpiFamily::Mpich)
        );
        assert_eq!(
            match_family("Intel(R) MPI Library 2019"),
            Some(MpiFamily::Intel)
        );
        assert_eq!(match_family(""), None);
        assert_eq!(match_family("gcc (GCC) 11.2"), None);
    }

    #[test]
    fn test_vendor_extraction() {
        let id = identify_vendor(
            "Open MPI v4.0.1, package: Open MPI Distribution, ident: 4.0.1",
        )
        .unwrap();
        assert_eq!(id.vendor, "Open MPI");
        assert_eq!(id.version, "4.0.1");
        assert_eq!(id.to_string(), "Open_MPI@4.0.1");

        let id = identify_vendor("MPICH Version:      3.3b2\nMPICH Release date:").unwrap();
        assert_eq!(id.vendor, "MPICH");
        assert_eq!(id.version, "3.3b2");
    }

    #[test]
    fn test_vendor_precedence() {
        // MVAPICH banners contain "MVAPICH", never plain "MPICH" first.
        let id = identify_vendor("MVAPICH Version: 2.3.6").unwrap();
        assert_eq!(id.vendor, "MVAPICH");
    }

    #[test]
    fn test_suffix_name() {
        let mut existing = BTreeSet::new();
        assert_eq!(suffix_name("mpich@3.3", &existing), "mpich@3.3");

        existing.insert("mpich@3.3".to_string());
        assert_eq!(suffix_name("mpich@3.3", &existing), "mpich@3.3-2");

        existing.insert("mpich@3.3-2".to_string());
        existing.insert("mpich@3.3-7".to_string());
        assert_eq!(suffix_name("mpich@3.3", &existing), "mpich@3.3-8");
    }

    #[test]
    fn test_from_cli() {
        assert_eq!(MpiFamily::from_cli("OpenMPI"), Some(MpiFamily::OpenMpi));
        assert_eq!(MpiFamily::from_cli("mpich"), Some(MpiFamily::Mpich));
        assert_eq!(MpiFamily::from_cli("lam"), None);
    }
}
