//! Tests for the two-level profile store.
//!
//! Validates round-trips, user-over-system precedence, selection
//! lifecycle, atomic updates and deterministic dumps.

use e4s_cl::profile::{Profile, ProfilePatch};
use e4s_cl::storage::{ProfileStore, StorageLevel};
use e4s_cl::Error;
use std::path::PathBuf;
use tempfile::TempDir;

fn open(tmp: &TempDir) -> ProfileStore {
    ProfileStore::with_paths(
        tmp.path().join("user/user.json"),
        tmp.path().join("system/system.json"),
    )
}

fn sample(name: &str) -> Profile {
    let mut profile = Profile::new(name);
    profile.backend = Some("apptainer".to_string());
    profile.image = Some("app.sif".to_string());
    profile.libraries.insert(PathBuf::from("/lib/libmpi.so.12"));
    profile.files.insert(PathBuf::from("/etc/libibverbs.d"));
    profile
}

// =============================================================================
// Round-Trips
// =============================================================================

#[test]
fn test_create_then_get_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);

    let profile = sample("mpich");
    store.create(profile.clone(), StorageLevel::User).unwrap();

    let (read_back, level) = store.get("mpich").unwrap();
    assert_eq!(read_back, profile);
    assert_eq!(level, StorageLevel::User);
}

#[test]
fn test_missing_store_reads_empty() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    assert!(store.list(None).unwrap().is_empty());
    assert!(store.selected().unwrap().is_none());
}

#[test]
fn test_create_duplicate_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("p"), StorageLevel::User).unwrap();
    assert!(matches!(
        store.create(sample("p"), StorageLevel::User),
        Err(Error::ProfileExists(_))
    ));
}

// =============================================================================
// Level Precedence
// =============================================================================

#[test]
fn test_user_store_shadows_system_store() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);

    let mut system_profile = sample("shared");
    system_profile.backend = Some("shifter".to_string());
    store
        .create(system_profile, StorageLevel::System)
        .unwrap();

    let (found, level) = store.get("shared").unwrap();
    assert_eq!(level, StorageLevel::System);
    assert_eq!(found.backend.as_deref(), Some("shifter"));

    let mut user_profile = sample("shared");
    user_profile.backend = Some("podman".to_string());
    store.create(user_profile, StorageLevel::User).unwrap();

    let (found, level) = store.get("shared").unwrap();
    assert_eq!(level, StorageLevel::User);
    assert_eq!(found.backend.as_deref(), Some("podman"));

    // A shadowed name lists once, from the user store.
    let listed = store.list(None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].1, StorageLevel::User);
}

// =============================================================================
// Selection Lifecycle
// =============================================================================

#[test]
fn test_select_unselect() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("a"), StorageLevel::User).unwrap();

    assert!(matches!(
        store.select("missing"),
        Err(Error::ProfileNotFound(_))
    ));

    store.select("a").unwrap();
    assert_eq!(store.selected().unwrap().as_deref(), Some("a"));

    store.unselect().unwrap();
    assert!(store.selected().unwrap().is_none());
}

#[test]
fn test_stale_selection_marker_reads_as_none() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("a"), StorageLevel::User).unwrap();
    store.select("a").unwrap();

    // Remove the profile behind the marker's back; the marker must not
    // resolve to a name that no longer exists in any store.
    let user_path = tmp.path().join("user/user.json");
    let mut document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&user_path).unwrap()).unwrap();
    document["profiles"] = serde_json::json!([]);
    std::fs::write(&user_path, serde_json::to_string(&document).unwrap()).unwrap();

    assert!(store.selected().unwrap().is_none());
}

#[test]
fn test_delete_refused_while_selected() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("a"), StorageLevel::User).unwrap();
    store.select("a").unwrap();

    assert!(matches!(
        store.delete("a"),
        Err(Error::ProfileSelected(_))
    ));

    store.unselect().unwrap();
    store.delete("a").unwrap();
    assert!(store.get("a").is_err());
}

#[test]
fn test_rename_follows_selection() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("old"), StorageLevel::User).unwrap();
    store.select("old").unwrap();

    store
        .update("old", |profile| {
            profile.name = "new".to_string();
            Ok(())
        })
        .unwrap();

    assert_eq!(store.selected().unwrap().as_deref(), Some("new"));
    assert!(store.get("old").is_err());
}

// =============================================================================
// Updates
// =============================================================================

#[test]
fn test_update_applies_patch_once() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store
        .create(Profile::new("p"), StorageLevel::User)
        .unwrap();

    let patch = ProfilePatch {
        add_libraries: vec![PathBuf::from("/lib/x.so.1")],
        ..Default::default()
    };
    store.update("p", |profile| profile.apply(&patch)).unwrap();
    store.update("p", |profile| profile.apply(&patch)).unwrap();

    let (profile, _) = store.get("p").unwrap();
    assert_eq!(profile.libraries.len(), 1);
}

#[test]
fn test_failed_update_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("p"), StorageLevel::User).unwrap();

    let result = store.update("p", |profile| {
        profile.libraries.insert(PathBuf::from("/etc/libibverbs.d"));
        // Now invalid: the path is already in `files`.
        Ok(())
    });
    assert!(result.is_err());

    let (profile, _) = store.get("p").unwrap();
    assert_eq!(profile, sample("p"));
}

#[test]
fn test_copy_lands_in_user_store() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("orig"), StorageLevel::System).unwrap();

    store.copy("orig", "clone").unwrap();
    let (clone, level) = store.get("clone").unwrap();
    assert_eq!(level, StorageLevel::User);
    assert_eq!(clone.libraries, sample("orig").libraries);
}

// =============================================================================
// Dumps
// =============================================================================

#[test]
fn test_dump_is_deterministic_and_sorted() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.create(sample("zeta"), StorageLevel::User).unwrap();
    store.create(sample("alpha"), StorageLevel::User).unwrap();

    let first = store.dump(StorageLevel::User).unwrap();
    let second = store.dump(StorageLevel::User).unwrap();
    assert_eq!(first, second);

    let alpha = first.find("\"alpha\"").unwrap();
    let zeta = first.find("\"zeta\"").unwrap();
    assert!(alpha < zeta, "profiles are sorted by name");
}
