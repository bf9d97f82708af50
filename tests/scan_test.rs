//! Integration tests for the resource collector

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::TestProject;
use firmforge::core::resources::FileType;
use firmforge::core::scanner::Collector;
use firmforge::core::target::LabelClass;

fn collector(targets: &[&str], features: &[&str]) -> Collector {
    let set = |labels: &[&str]| labels.iter().map(|l| (*l).to_string()).collect::<BTreeSet<_>>();
    let mut labels = BTreeMap::new();
    labels.insert(LabelClass::Target, set(targets));
    labels.insert(LabelClass::Toolchain, set(&["GCC_ARM"]));
    labels.insert(LabelClass::Feature, set(features));
    Collector::new(labels)
}

fn file_names(resources: &firmforge::core::resources::Resources, file_type: FileType) -> Vec<String> {
    let mut names: Vec<String> = resources
        .files(file_type)
        .iter()
        .filter_map(|f| f.path.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================
// Label exclusion
// ============================================

#[test]
fn test_inactive_target_contributes_nothing() {
    let project = TestProject::new();
    project.create_file("TARGET_A/a.c", "");
    project.create_file("TARGET_B/b.c", "");
    project.create_file("TARGET_B/include/b.h", "");

    let resources = collector(&["A"], &[])
        .collect_ignores(true)
        .scan(&[project.path()])
        .unwrap();

    assert_eq!(file_names(&resources, FileType::C), vec!["a.c"]);
    assert!(file_names(&resources, FileType::Header).is_empty());
    assert!(resources.ignored_dirs().iter().any(|d| d.ends_with("TARGET_B")));
    assert!(!resources.include_dirs().iter().any(|d| d.starts_with(project.path().join("TARGET_B"))));
}

#[test]
fn test_ignored_dirs_only_recorded_on_request() {
    let project = TestProject::new();
    project.create_file("TARGET_B/b.c", "");

    let resources = collector(&["A"], &[]).scan(&[project.path()]).unwrap();

    assert!(resources.ignored_dirs().is_empty());
}

#[test]
fn test_hidden_and_vcs_dirs_are_skipped() {
    let project = TestProject::new();
    project.create_file(".cache/x.c", "");
    project.create_file(".git/hooks/y.c", "");
    project.create_file("src/main.c", "");

    let resources = collector(&[], &[]).scan(&[project.path()]).unwrap();

    assert_eq!(file_names(&resources, FileType::C), vec!["main.c"]);
}

// ============================================
// Features
// ============================================

#[test]
fn test_feature_scanned_only_on_lookup() {
    let project = TestProject::new();
    project.create_file("src/main.c", "");
    project.create_file("FEATURE_BLE/ble.c", "");
    project.create_file("FEATURE_BLE/stack/gap.c", "");

    let resources = collector(&[], &["BLE"]).scan(&[project.path()]).unwrap();
    let lazy = resources.lazy_feature("BLE").unwrap();
    assert!(!lazy.is_scanned());
    assert_eq!(file_names(&resources, FileType::C), vec!["main.c"]);

    let first = resources.feature("BLE").unwrap().unwrap();
    assert!(lazy.is_scanned());
    assert_eq!(file_names(first, FileType::C), vec!["ble.c", "gap.c"]);

    let second = resources.feature("BLE").unwrap().unwrap();
    assert!(std::ptr::eq(first, second));
}

#[test]
fn test_resolve_features_merges_active_only() {
    let project = TestProject::new();
    project.create_file("src/main.c", "");
    project.create_file("FEATURE_BLE/ble.c", "");
    project.create_file("FEATURE_BLE/FEATURE_MESH/mesh.c", "");
    project.create_file("FEATURE_USB/usb.c", "");

    let resources = collector(&[], &["BLE", "MESH"]).scan(&[project.path()]).unwrap();
    let active = vec!["BLE".to_string(), "MESH".to_string()];
    let resolved = resources.resolve_features(&active).unwrap();

    assert_eq!(file_names(&resolved, FileType::C), vec!["ble.c", "main.c", "mesh.c"]);
    assert!(!resources.lazy_feature("USB").unwrap().is_scanned());
}

#[test]
fn test_unknown_feature_lookup_is_none() {
    let project = TestProject::new();
    project.create_file("src/main.c", "");

    let resources = collector(&[], &[]).scan(&[project.path()]).unwrap();

    assert!(resources.feature("NOPE").unwrap().is_none());
}

// ============================================
// Ignore manifests
// ============================================

#[test]
fn test_ignore_patterns_are_anchored_to_their_directory() {
    let project = TestProject::new();
    project.create_file("lib/.buildignore", "# generated code\n\ngen/*\n");
    project.create_file("lib/gen/out.c", "");
    project.create_file("lib/keep.c", "");
    project.create_file("gen/top.c", "");

    let resources = collector(&[], &[]).scan(&[project.path()]).unwrap();

    assert_eq!(file_names(&resources, FileType::C), vec!["keep.c", "top.c"]);
}

#[test]
fn test_ignore_rules_apply_under_bracketed_root() {
    let project = TestProject::new();
    project.create_file("proj[1]/.buildignore", "gen/*\n");
    project.create_file("proj[1]/gen/out.c", "");
    project.create_file("proj[1]/keep.c", "");

    let resources = collector(&[], &[])
        .scan(&[project.path().join("proj[1]")])
        .unwrap();

    assert_eq!(file_names(&resources, FileType::C), vec!["keep.c"]);
}

#[test]
fn test_multiple_roots_share_one_registry() {
    let project = TestProject::new();
    project.create_file("app/main.c", "");
    project.create_file("lib/util.cpp", "");

    let resources = collector(&[], &[])
        .scan(&[project.path().join("app"), project.path().join("lib")])
        .unwrap();

    assert_eq!(resources.sources().count(), 2);
    assert_eq!(resources.include_dirs().len(), 2);
}

#[test]
fn test_missing_root_is_an_error() {
    let project = TestProject::new();
    let result = collector(&[], &[]).scan(&[project.path().join("absent")]);
    assert!(result.is_err());
}
