//! Unit tests for configuration and root folder resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate LEXCORPUS_ROOT are marked with #[serial] to
//! ensure they run sequentially, not in parallel.

use lexcorpus_common::config::{database_path, resolve_root_folder};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var("LEXCORPUS_ROOT", "/tmp/lexcorpus-env-folder");

    let root = resolve_root_folder(Some("/tmp/lexcorpus-cli-folder"), "LEXCORPUS_ROOT").unwrap();
    assert_eq!(root, PathBuf::from("/tmp/lexcorpus-cli-folder"));

    env::remove_var("LEXCORPUS_ROOT");
}

#[test]
#[serial]
fn test_env_var_beats_defaults() {
    env::set_var("LEXCORPUS_ROOT", "/tmp/lexcorpus-env-folder");

    let root = resolve_root_folder(None, "LEXCORPUS_ROOT").unwrap();
    assert_eq!(root, PathBuf::from("/tmp/lexcorpus-env-folder"));

    env::remove_var("LEXCORPUS_ROOT");
}

#[test]
#[serial]
fn test_falls_back_to_platform_default() {
    env::remove_var("LEXCORPUS_ROOT");

    let root = resolve_root_folder(None, "LEXCORPUS_ROOT").unwrap();
    assert!(!root.as_os_str().is_empty());

    #[cfg(target_os = "linux")]
    {
        let path_str = root.to_string_lossy();
        assert!(
            path_str.contains("lexcorpus"),
            "Linux default should end in lexcorpus, got {}",
            path_str
        );
    }
}

#[test]
fn test_database_path_inside_root() {
    let db = database_path(&PathBuf::from("/srv/lexcorpus"));
    assert_eq!(db, PathBuf::from("/srv/lexcorpus/lexcorpus.db"));
}
