//! Tests for the profile data model: serialization shape, invariants and
//! diffs.

use e4s_cl::profile::{Profile, ProfilePatch};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[test]
fn test_serialization_omits_empty_fields() {
    let profile = Profile::new("bare");
    let json = serde_json::to_string(&profile).unwrap();
    assert_eq!(json, r#"{"name":"bare"}"#);
}

#[test]
fn test_serde_round_trip() {
    let mut profile = Profile::new("full");
    profile.backend = Some("podman".to_string());
    profile.image = Some("registry/app:1".to_string());
    profile.libraries.insert(PathBuf::from("/lib/libmpi.so.12"));
    profile.files.insert(PathBuf::from("/etc/hosts"));
    profile.source = Some(PathBuf::from("/env.sh"));
    profile.wi4mpi = Some(PathBuf::from("/opt/wi4mpi"));
    profile.wi4mpi_options = Some("-T openmpi".to_string());

    let json = serde_json::to_string_pretty(&profile).unwrap();
    let read_back: Profile = serde_json::from_str(&json).unwrap();
    assert_eq!(read_back, profile);
}

#[test]
fn test_library_paths_deduplicate() {
    let mut profile = Profile::new("p");
    let patch = ProfilePatch {
        add_libraries: vec![
            PathBuf::from("/lib/x.so.1"),
            PathBuf::from("/lib/x.so.1"),
            PathBuf::from("/lib/y.so.2"),
        ],
        ..Default::default()
    };
    profile.apply(&patch).unwrap();
    assert_eq!(
        profile.libraries,
        BTreeSet::from([PathBuf::from("/lib/x.so.1"), PathBuf::from("/lib/y.so.2")])
    );
}

#[test]
fn test_remove_patch() {
    let mut profile = Profile::new("p");
    profile.apply(&ProfilePatch {
        add_libraries: vec![PathBuf::from("/lib/x.so.1")],
        add_files: vec![PathBuf::from("/data")],
        ..Default::default()
    })
    .unwrap();

    profile
        .apply(&ProfilePatch {
            remove_libraries: vec![PathBuf::from("/lib/x.so.1")],
            ..Default::default()
        })
        .unwrap();
    assert!(profile.libraries.is_empty());
    assert!(!profile.files.is_empty());
}

#[test]
fn test_library_file_overlap_rejected() {
    let mut profile = Profile::new("p");
    profile.files.insert(PathBuf::from("/shared/path"));
    let result = profile.apply(&ProfilePatch {
        add_libraries: vec![PathBuf::from("/shared/path")],
        ..Default::default()
    });
    assert!(result.is_err());
}

#[test]
fn test_diff_rendering() {
    let mut left = Profile::new("left");
    left.image = Some("a.sif".to_string());
    left.libraries.insert(PathBuf::from("/lib/only-left.so"));
    let mut right = Profile::new("right");
    right.image = Some("b.sif".to_string());
    right.files.insert(PathBuf::from("/only-right"));

    let rendered: Vec<String> = left
        .diff(&right)
        .into_iter()
        .map(|d| d.to_string())
        .collect();

    assert!(rendered.iter().any(|line| line.contains("image")
        && line.contains("a.sif")
        && line.contains("b.sif")));
    assert!(rendered
        .iter()
        .any(|line| line.starts_with("< libraries: /lib/only-left.so")));
    assert!(rendered
        .iter()
        .any(|line| line.starts_with("> files: /only-right")));
}
