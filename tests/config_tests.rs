//! Tests for layered YAML configuration loading.

use e4s_cl::config::Configuration;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_defaults_without_files() {
    let config = Configuration::load_from(&[]).unwrap();
    assert_eq!(config.container_directory, "/.e4s-cl");
    assert!(!config.preload_root_libraries);
    assert!(config.launcher_options.is_empty());
}

#[test]
fn test_later_files_override_earlier() {
    let tmp = TempDir::new().unwrap();
    let site = tmp.path().join("site.yaml");
    let user = tmp.path().join("user.yaml");
    fs::write(
        &site,
        "container_directory: /site\nlauncher_options: [\"--tag-output\"]\n",
    )
    .unwrap();
    fs::write(&user, "container_directory: /user\n").unwrap();

    let config = Configuration::load_from(&[site, user]).unwrap();
    assert_eq!(config.container_directory, "/user");
    // Unset keys keep the earlier layer's value.
    assert_eq!(config.launcher_options, vec!["--tag-output"]);
}

#[test]
fn test_missing_files_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let config =
        Configuration::load_from(&[tmp.path().join("absent.yaml")]).unwrap();
    assert_eq!(config.container_directory, "/.e4s-cl");
}

#[test]
fn test_bad_value_shape_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.yaml");
    fs::write(&path, "preload_root_libraries: \"yes please\"\n").unwrap();
    assert!(Configuration::load_from(&[path]).is_err());
}

#[test]
fn test_backend_tables_merge() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("backends.yaml");
    fs::write(
        &path,
        "podman:\n  run_options: [\"--security-opt\", \"label=disable\"]\n\
         apptainer:\n  executable: /opt/apptainer/bin/apptainer\n",
    )
    .unwrap();

    let config = Configuration::load_from(&[path]).unwrap();
    assert_eq!(
        config.backend("podman").run_options,
        vec!["--security-opt", "label=disable"]
    );
    assert!(config.backend("apptainer").executable.is_some());
    // Unconfigured backends read as empty tables.
    assert!(config.backend("shifter").options.is_empty());
}
