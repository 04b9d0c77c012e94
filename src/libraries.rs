//! Shared-object analysis and path classification.
//!
//! This module turns the raw path observations of a traced MPI run into the
//! disjoint library / file / directory sets stored in a profile, completes
//! library sets along the dynamic-linker search order, and decides, for each
//! host library, whether it should be bound over the container's own copy.

use crate::constants::CONTAINER_ONLY_PREFIXES;
use crate::error::{Error, Result};
use goblin::elf::Elf;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Path prefixes holding transient, kernel or session files that are never
/// worth importing into a container.
const TRANSIENT_PREFIXES: &[&str] = &["/tmp", "/sys", "/proc", "/dev", "/run"];

/// Directories the dynamic linker searches when everything else fails.
const DEFAULT_SEARCH_DIRS: &[&str] = &[
    "/lib64",
    "/lib",
    "/usr/lib64",
    "/usr/lib",
    "/usr/local/lib64",
    "/usr/local/lib",
];

// =============================================================================
// ELF Records
// =============================================================================

/// True when the file starts with the ELF magic bytes.
pub fn is_elf(path: &Path) -> bool {
    use std::io::Read;
    let mut magic = [0u8; 4];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) => magic == [0x7f, b'E', b'L', b'F'],
        Err(_) => false,
    }
}

/// Dynamic-section summary of one shared object on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLibrary {
    /// Path as observed.
    pub host_path: PathBuf,
    /// Path with every symlink resolved.
    pub realpath: PathBuf,
    /// `DT_SONAME`, when the object declares one.
    pub soname: Option<String>,
    /// `DT_NEEDED` entries.
    pub needed: Vec<String>,
    /// `DT_RPATH`/`DT_RUNPATH` entries with `$ORIGIN` expanded.
    pub search_paths: Vec<PathBuf>,
    /// Version names defined in `.gnu.version_d`.
    pub defined_versions: BTreeSet<String>,
}

impl HostLibrary {
    /// Parses the dynamic section of a shared object.
    pub fn from_path(path: &Path) -> Result<Self> {
        let realpath = fs::canonicalize(path).map_err(|e| Error::ElfParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let bytes = fs::read(&realpath).map_err(|e| Error::ElfParse {
            path: realpath.clone(),
            reason: e.to_string(),
        })?;
        let elf = Elf::parse(&bytes).map_err(|e| Error::ElfParse {
            path: realpath.clone(),
            reason: e.to_string(),
        })?;

        let origin = realpath.parent().unwrap_or(Path::new("/")).to_path_buf();
        let mut search_paths = Vec::new();
        for entry in elf.rpaths.iter().chain(elf.runpaths.iter()) {
            for dir in entry.split(':').filter(|d| !d.is_empty()) {
                let expanded = dir
                    .replace("${ORIGIN}", &origin.to_string_lossy())
                    .replace("$ORIGIN", &origin.to_string_lossy());
                search_paths.push(PathBuf::from(expanded));
            }
        }

        let mut defined_versions = BTreeSet::new();
        if let Some(verdef) = &elf.verdef {
            for def in verdef.iter() {
                for aux in def.iter() {
                    if let Some(name) = elf.dynstrtab.get_at(aux.vda_name as usize) {
                        defined_versions.insert(name.to_string());
                    }
                }
            }
        }

        Ok(Self {
            host_path: path.to_path_buf(),
            realpath,
            soname: elf.soname.map(str::to_owned),
            needed: elf.libraries.iter().map(|s| s.to_string()).collect(),
            search_paths,
            defined_versions,
        })
    }

    /// The name other objects resolve this library under.
    pub fn key(&self) -> String {
        self.soname
            .clone()
            .unwrap_or_else(|| self.realpath.to_string_lossy().into_owned())
    }

    /// The `GLIBC_x.y` versions this object defines.
    pub fn glibc_versions(&self) -> BTreeSet<GlibcVersion> {
        glibc_versions(&self.defined_versions)
    }
}

/// Sibling paths resolving to the same file as `path`, the library itself
/// included. Depending on how a binary was linked it may request
/// `libmpi.so`, `libmpi.so.12` or `libmpi.so.12.1.8`; binding every alias
/// keeps all of them resolvable in the container.
pub fn library_links(path: &Path) -> Vec<PathBuf> {
    let mut links = vec![path.to_path_buf()];
    let Ok(target) = fs::canonicalize(path) else {
        return links;
    };
    let Some(parent) = target.parent() else {
        return links;
    };
    if let Ok(entries) = fs::read_dir(parent) {
        for entry in entries.flatten() {
            let candidate = entry.path();
            if candidate == *path {
                continue;
            }
            if let Ok(resolved) = fs::canonicalize(&candidate) {
                if resolved == target {
                    links.push(candidate);
                }
            }
        }
    }
    links.sort();
    links.dedup();
    links
}

// =============================================================================
// Library Sets
// =============================================================================

/// A set of host libraries deduplicated by soname (falling back to the
/// resolved path for unnamed objects).
#[derive(Debug, Clone, Default)]
pub struct LibrarySet {
    by_key: BTreeMap<String, HostLibrary>,
}

impl LibrarySet {
    /// Builds a set from library paths, parsing each object. Paths that
    /// fail to parse are skipped and reported back to the caller.
    pub fn from_paths<'a>(
        paths: impl IntoIterator<Item = &'a PathBuf>,
    ) -> (Self, Vec<String>) {
        let mut set = Self::default();
        let mut skipped = Vec::new();
        for path in paths {
            match HostLibrary::from_path(path) {
                Ok(library) => {
                    set.insert(library);
                }
                Err(err) => skipped.push(err.to_string()),
            }
        }
        (set, skipped)
    }

    /// Inserts a library, deduplicating on its key. Returns false when an
    /// equivalent library was already present.
    pub fn insert(&mut self, library: HostLibrary) -> bool {
        let key = library.key();
        if self.by_key.contains_key(&key) {
            return false;
        }
        self.by_key.insert(key, library);
        true
    }

    /// Looks a library up by soname.
    pub fn find(&self, soname: &str) -> Option<&HostLibrary> {
        self.by_key.get(soname)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostLibrary> {
        self.by_key.values()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Libraries no other member depends on; these are the roots the
    /// dynamic linker would not load transitively, so they are the ones
    /// worth preloading.
    pub fn top_level(&self) -> Vec<&HostLibrary> {
        let needed: BTreeSet<&str> = self
            .by_key
            .values()
            .flat_map(|l| l.needed.iter().map(String::as_str))
            .collect();
        self.by_key
            .values()
            .filter(|l| match &l.soname {
                Some(soname) => !needed.contains(soname.as_str()),
                None => true,
            })
            .collect()
    }
}

impl IntoIterator for LibrarySet {
    type Item = HostLibrary;
    type IntoIter = std::collections::btree_map::IntoValues<String, HostLibrary>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_key.into_values()
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Disjoint classification of observed paths.
#[derive(Debug, Default)]
pub struct Classification {
    pub libraries: LibrarySet,
    pub files: BTreeSet<PathBuf>,
    pub directories: BTreeSet<PathBuf>,
    /// Paths dropped for cause, with the reason, for user-facing warnings.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Classifies a bag of observed paths.
///
/// Rules, in order: container-only and transient paths are dropped, paths
/// missing from the host filesystem are rejected, an ELF object declaring a
/// `SONAME` is a library, a directory is a directory, everything else is a
/// file. Paths under one of `reserved` directories collapse into that
/// directory. Classification is idempotent: feeding the output back in
/// reproduces it.
pub fn classify(
    paths: impl IntoIterator<Item = PathBuf>,
    reserved: &[PathBuf],
) -> Classification {
    let mut result = Classification::default();

    'paths: for path in paths {
        for prefix in CONTAINER_ONLY_PREFIXES {
            if path.starts_with(prefix) {
                debug!("Dropping container-only path {}", path.display());
                continue 'paths;
            }
        }

        if path.file_name().is_some_and(|n| n == "ld.so.cache") {
            continue;
        }
        for prefix in TRANSIENT_PREFIXES {
            if path.starts_with(prefix) {
                debug!("Dropping transient path {}", path.display());
                continue 'paths;
            }
        }

        for dir in reserved {
            if path.starts_with(dir) {
                result.directories.insert(dir.clone());
                continue 'paths;
            }
        }

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                result.rejected.push((path, err.to_string()));
                continue;
            }
        };

        if metadata.is_dir() {
            result.directories.insert(path);
            continue;
        }

        if is_elf(&path) {
            match HostLibrary::from_path(&path) {
                Ok(library) if library.soname.is_some() => {
                    result.libraries.insert(library);
                    continue;
                }
                Ok(_) => {
                    // An ELF object without a SONAME (a plain binary or a
                    // dlopened plugin) must be imported at its full path.
                }
                Err(err) => {
                    result.rejected.push((path.clone(), err.to_string()));
                    continue;
                }
            }
        }

        result.files.insert(path);
    }

    result
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves sonames the way the dynamic linker would: the dependent's
/// `DT_RPATH`/`DT_RUNPATH`, the `LD_LIBRARY_PATH` captured at construction,
/// the default search directories, then the ldconfig cache.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    ld_library_path: Vec<PathBuf>,
    default_dirs: Vec<PathBuf>,
    cache: BTreeMap<String, PathBuf>,
}

impl Resolver {
    /// Builds a resolver from the current environment and the host ldconfig
    /// cache.
    pub fn from_environment() -> Self {
        let ld_library_path = std::env::var("LD_LIBRARY_PATH")
            .unwrap_or_default()
            .split(':')
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .collect();

        Self {
            ld_library_path,
            default_dirs: DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from).collect(),
            cache: host_cache().clone(),
        }
    }

    /// A resolver over explicit parts, for tests.
    pub fn with_parts(
        ld_library_path: Vec<PathBuf>,
        default_dirs: Vec<PathBuf>,
        cache: BTreeMap<String, PathBuf>,
    ) -> Self {
        Self {
            ld_library_path,
            default_dirs,
            cache,
        }
    }

    /// Finds the file a soname resolves to, honoring the dependent's own
    /// search paths first.
    pub fn resolve(&self, soname: &str, dependent: Option<&HostLibrary>) -> Option<PathBuf> {
        let rpaths = dependent.map(|d| d.search_paths.as_slice()).unwrap_or(&[]);
        for dir in rpaths
            .iter()
            .chain(self.ld_library_path.iter())
            .chain(self.default_dirs.iter())
        {
            let candidate = dir.join(soname);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        self.cache.get(soname).cloned()
    }
}

/// The host's ldconfig cache, read once per process.
pub fn host_cache() -> &'static BTreeMap<String, PathBuf> {
    static CACHE: std::sync::OnceLock<BTreeMap<String, PathBuf>> = std::sync::OnceLock::new();
    CACHE.get_or_init(|| match host_ldconfig_output() {
        Ok(text) => parse_ldconfig_cache(&text),
        Err(err) => {
            warn!("Could not read the host ldconfig cache: {}", err);
            BTreeMap::new()
        }
    })
}

/// Runs `ldconfig -p` on the host.
fn host_ldconfig_output() -> Result<String> {
    let ldconfig = crate::util::which("ldconfig")
        .or_else(|| crate::util::which("/sbin/ldconfig"))
        .ok_or_else(|| Error::ExecutableNotFound("ldconfig".to_string()))?;
    let output = Command::new(ldconfig).arg("-p").output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `ldconfig -p` output into a soname → path map.
pub fn parse_ldconfig_cache(text: &str) -> BTreeMap<String, PathBuf> {
    let mut cache = BTreeMap::new();
    for line in text.lines().skip(1) {
        let Some((name_part, path)) = line.split_once("=>") else {
            continue;
        };
        let soname = name_part
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or_default();
        if soname.is_empty() {
            continue;
        }
        // First entry wins, matching the linker's preference order.
        cache
            .entry(soname.to_string())
            .or_insert_with(|| PathBuf::from(path.trim()));
    }
    cache
}

/// Completes a library set to its `DT_NEEDED` fixed point. Each soname is
/// visited at most once, so dependency cycles terminate. Returns the
/// sonames that could not be resolved; these are warnings, not failures.
pub fn complete(set: &mut LibrarySet, resolver: &Resolver) -> Vec<String> {
    let mut unresolved = Vec::new();
    let mut visited: BTreeSet<String> = set.iter().map(HostLibrary::key).collect();
    let mut worklist: VecDeque<(String, Option<HostLibrary>)> = set
        .iter()
        .flat_map(|l| {
            let dependent = l.clone();
            l.needed
                .iter()
                .map(move |n| (n.clone(), Some(dependent.clone())))
                .collect::<Vec<_>>()
        })
        .collect();

    while let Some((soname, dependent)) = worklist.pop_front() {
        if !visited.insert(soname.clone()) {
            continue;
        }

        let Some(path) = resolver.resolve(&soname, dependent.as_ref()) else {
            unresolved.push(soname);
            continue;
        };

        match HostLibrary::from_path(&path) {
            Ok(library) => {
                for needed in &library.needed {
                    worklist.push_back((needed.clone(), Some(library.clone())));
                }
                set.insert(library);
            }
            Err(err) => {
                warn!("Skipping dependency {}: {}", soname, err);
                unresolved.push(soname);
            }
        }
    }

    unresolved
}

// =============================================================================
// Versions
// =============================================================================

/// A parsed `GLIBC_x.y[.z]` version, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlibcVersion(pub u32, pub u32, pub u32);

impl GlibcVersion {
    /// Extracts the first dotted version number from free-form text, e.g.
    /// `"ldconfig (GNU libc) 2.35"` or `"GLIBC_2.17"`.
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find(|c: char| c.is_ascii_digit())?;
        let number: String = text[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = number.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self(major, minor, patch))
    }
}

impl std::fmt::Display for GlibcVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.2 == 0 {
            write!(f, "{}.{}", self.0, self.1)
        } else {
            write!(f, "{}.{}.{}", self.0, self.1, self.2)
        }
    }
}

/// The `GLIBC_*` members of a defined-version set.
pub fn glibc_versions(defined: &BTreeSet<String>) -> BTreeSet<GlibcVersion> {
    defined
        .iter()
        .filter(|name| name.starts_with("GLIBC_"))
        .filter_map(|name| GlibcVersion::parse(name))
        .collect()
}

/// Orders two defined-version sets: strict superset containment wins, and
/// incomparable sets fall back to their maximum version.
pub fn compare_version_sets(
    host: &BTreeSet<GlibcVersion>,
    guest: &BTreeSet<GlibcVersion>,
) -> Ordering {
    if host == guest {
        return Ordering::Equal;
    }
    if host.is_superset(guest) {
        return Ordering::Greater;
    }
    if guest.is_superset(host) {
        return Ordering::Less;
    }
    host.iter().max().cmp(&guest.iter().max())
}

// =============================================================================
// Host/Container Tie-Break
// =============================================================================

/// What the container probe reported: the sonames its linker resolves, and
/// its glibc version.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    /// Soname → in-container path, from the container's ldconfig cache.
    pub cache: BTreeMap<String, PathBuf>,
    /// The container's glibc version, when detectable.
    pub libc_version: Option<GlibcVersion>,
}

/// Outcome of the tie-break for one host library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDecision {
    /// Bind the host copy into the container.
    BindHost,
    /// The container's copy is strictly newer; leave it alone.
    KeepContainer,
}

/// Decides whether a host library should be bound over the container's
/// copy of the same soname.
///
/// A library only present on the host is always bound. When both sides have
/// it, the versioned symbols the host copy defines are compared against the
/// container's glibc: only a strictly newer container wins. Ties bind the
/// host copy, since MPI libraries must come from the host for the launch to
/// work at all.
pub fn tie_break(host: &HostLibrary, container: &ContainerInfo) -> BindDecision {
    let Some(soname) = &host.soname else {
        return BindDecision::BindHost;
    };
    if !container.cache.contains_key(soname) {
        return BindDecision::BindHost;
    }

    let host_versions = host.glibc_versions();
    let Some(guest_libc) = container.libc_version else {
        return BindDecision::BindHost;
    };
    if host_versions.is_empty() {
        return BindDecision::BindHost;
    }

    // The container probe only exposes its glibc release, so the guest's
    // version set is approximated by every GLIBC_* version up to it.
    let guest_versions: BTreeSet<GlibcVersion> = host_versions
        .iter()
        .copied()
        .filter(|v| *v <= guest_libc)
        .chain(std::iter::once(guest_libc))
        .collect();

    match compare_version_sets(&host_versions, &guest_versions) {
        Ordering::Less => BindDecision::KeepContainer,
        Ordering::Equal | Ordering::Greater => BindDecision::BindHost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn library(soname: &str, versions: &[&str]) -> HostLibrary {
        HostLibrary {
            host_path: PathBuf::from(format!("/lib/{}", soname)),
            realpath: PathBuf::from(format!("/lib/{}", soname)),
            soname: Some(soname.to_string()),
            needed: Vec::new(),
            search_paths: Vec::new(),
            defined_versions: versions.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_ldconfig_cache() {
        let text = "\
42 libs found in cache `/etc/ld.so.cache'
\tlibmpi.so.12 (libc6,x86-64) => /opt/mpich/lib/libmpi.so.12
\tlibc.so.6 (libc6,x86-64) => /lib/x86_64-linux-gnu/libc.so.6
\tlibc.so.6 (libc6) => /lib32/libc.so.6
";
        let cache = parse_ldconfig_cache(text);
        assert_eq!(
            cache.get("libmpi.so.12"),
            Some(&PathBuf::from("/opt/mpich/lib/libmpi.so.12"))
        );
        // First entry wins for duplicated sonames.
        assert_eq!(
            cache.get("libc.so.6"),
            Some(&PathBuf::from("/lib/x86_64-linux-gnu/libc.so.6"))
        );
    }

    #[test]
    fn test_glibc_version_parse_and_order() {
        assert_eq!(GlibcVersion::parse("GLIBC_2.17"), Some(GlibcVersion(2, 17, 0)));
        assert_eq!(
            GlibcVersion::parse("ldconfig (GNU libc) 2.35"),
            Some(GlibcVersion(2, 35, 0))
        );
        assert!(GlibcVersion(2, 34, 0) > GlibcVersion(2, 4, 0));
        assert_eq!(GlibcVersion::parse("no digits"), None);
    }

    #[test]
    fn test_compare_version_sets_containment() {
        let small: BTreeSet<_> = [GlibcVersion(2, 4, 0)].into();
        let large: BTreeSet<_> = [GlibcVersion(2, 4, 0), GlibcVersion(2, 17, 0)].into();
        assert_eq!(compare_version_sets(&large, &small), Ordering::Greater);
        assert_eq!(compare_version_sets(&small, &large), Ordering::Less);
        assert_eq!(compare_version_sets(&small, &small.clone()), Ordering::Equal);
    }

    #[test]
    fn test_tie_break_host_only() {
        let host = library("libmpi.so.12", &["GLIBC_2.17"]);
        let container = ContainerInfo::default();
        assert_eq!(tie_break(&host, &container), BindDecision::BindHost);
    }

    #[test]
    fn test_tie_break_container_newer() {
        let host = library("libm.so.6", &["GLIBC_2.17", "GLIBC_2.29"]);
        let container = ContainerInfo {
            cache: [("libm.so.6".to_string(), PathBuf::from("/lib/libm.so.6"))].into(),
            libc_version: Some(GlibcVersion(2, 35, 0)),
        };
        assert_eq!(tie_break(&host, &container), BindDecision::KeepContainer);
    }

    #[test]
    fn test_tie_break_host_newer_or_equal() {
        let host = library("libm.so.6", &["GLIBC_2.17", "GLIBC_2.29"]);
        let container = ContainerInfo {
            cache: [("libm.so.6".to_string(), PathBuf::from("/lib/libm.so.6"))].into(),
            libc_version: Some(GlibcVersion(2, 17, 0)),
        };
        assert_eq!(tie_break(&host, &container), BindDecision::BindHost);

        let same = ContainerInfo {
            cache: [("libm.so.6".to_string(), PathBuf::from("/lib/libm.so.6"))].into(),
            libc_version: Some(GlibcVersion(2, 29, 0)),
        };
        assert_eq!(tie_break(&host, &same), BindDecision::BindHost);
    }

    /// Scratch space outside /tmp: classification drops transient prefixes,
    /// /tmp among them.
    fn scratch_dir() -> TempDir {
        tempfile::Builder::new()
            .prefix("classify-test")
            .tempdir_in(env!("CARGO_MANIFEST_DIR"))
            .unwrap()
    }

    #[test]
    fn test_classify_plain_files_and_directories() {
        let tmp = scratch_dir();
        let file = tmp.path().join("input.conf");
        File::create(&file).unwrap();
        let dir = tmp.path().join("data");
        fs::create_dir(&dir).unwrap();
        let missing = tmp.path().join("gone");

        let result = classify(
            vec![
                file.clone(),
                dir.clone(),
                missing.clone(),
                PathBuf::from("/.e4s-cl/entry"),
                PathBuf::from("/proc/self/maps"),
            ],
            &[],
        );

        assert!(result.files.contains(&file));
        assert!(result.directories.contains(&dir));
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].0, missing);
        assert!(result.libraries.is_empty());
    }

    #[test]
    fn test_classify_is_idempotent() {
        let tmp = scratch_dir();
        let file = tmp.path().join("input.conf");
        File::create(&file).unwrap();
        let dir = tmp.path().join("data");
        fs::create_dir(&dir).unwrap();

        let first = classify(vec![file, dir], &[]);
        let again = classify(
            first
                .files
                .iter()
                .chain(first.directories.iter())
                .cloned()
                .collect::<Vec<_>>(),
            &[],
        );
        assert_eq!(first.files, again.files);
        assert_eq!(first.directories, again.directories);
        assert!(again.rejected.is_empty());
    }

    #[test]
    fn test_classify_reserved_directories_collapse() {
        let tmp = scratch_dir();
        let reserved = tmp.path().join("spool");
        fs::create_dir(&reserved).unwrap();
        let inner = reserved.join("cred");
        File::create(&inner).unwrap();

        let result = classify(vec![inner], &[reserved.clone()]);
        assert!(result.directories.contains(&reserved));
        assert!(result.files.is_empty());
    }

    #[test]
    fn test_library_set_dedup_by_soname() {
        let mut set = LibrarySet::default();
        assert!(set.insert(library("libx.so.1", &[])));
        let mut duplicate = library("libx.so.1", &[]);
        duplicate.host_path = PathBuf::from("/other/libx.so.1");
        assert!(!set.insert(duplicate));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_top_level_excludes_dependencies() {
        let mut set = LibrarySet::default();
        let mut root = library("libmpi.so.12", &[]);
        root.needed = vec!["libuv.so.1".to_string()];
        set.insert(root);
        set.insert(library("libuv.so.1", &[]));

        let roots: Vec<_> = set
            .top_level()
            .into_iter()
            .filter_map(|l| l.soname.clone())
            .collect();
        assert_eq!(roots, vec!["libmpi.so.12".to_string()]);
    }

    #[test]
    fn test_complete_reports_unresolved() {
        let mut set = LibrarySet::default();
        let mut root = library("libmpi.so.12", &[]);
        root.needed = vec!["libdoesnotexist.so.9".to_string()];
        set.insert(root);

        let resolver = Resolver::with_parts(Vec::new(), Vec::new(), BTreeMap::new());
        let unresolved = complete(&mut set, &resolver);
        assert_eq!(unresolved, vec!["libdoesnotexist.so.9".to_string()]);
        assert_eq!(set.len(), 1);
    }
}
