use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fieldpack_core::{sha256_file_hex, AppVersion, EngineError, ManifestKind};

use crate::{
    load_manifests, update_file_stem, version_from_stem, AppFolderLookup, UpdateLocator,
    UpgradeResolver,
};

struct MapLookup(BTreeMap<String, String>);

impl AppFolderLookup for MapLookup {
    fn folder_name(&self, app: &str) -> Option<String> {
        self.0.get(app).cloned()
    }
}

fn test_root(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("fieldpack-resolver-{label}-{nanos}"));
    fs::create_dir_all(&dir).expect("must create test root");
    dir
}

fn locator_with(root: &Path, mappings: &[(&str, &str)]) -> UpdateLocator {
    let map = mappings
        .iter()
        .map(|(app, folder)| (app.to_string(), folder.to_string()))
        .collect();
    UpdateLocator::new(root, Arc::new(MapLookup(map)))
}

fn touch(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
    // Keep mtimes strictly increasing across sequential touches.
    thread::sleep(Duration::from_millis(15));
}

fn version(input: &str) -> AppVersion {
    AppVersion::parse(input).expect("version must parse")
}

fn manifest_json(id: &str, priority: i32, deps: &[&str], target: &str) -> String {
    let deps = deps
        .iter()
        .map(|dep| format!("\"{dep}\""))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"{{"id": "{id}", "name": "{id}", "version": "{target}",
            "appliesTo": {{"minVersion": "0.1.0"}},
            "targetVersion": "{target}", "priority": {priority},
            "dependencies": [{deps}],
            "files": [{{"path": "{id}.bin", "target": "lib/", "size": 100}}]}}"#
    )
}

#[test]
fn folder_lookup_prefers_mapping_then_same_named_subdir() {
    let root = test_root("folders");
    fs::create_dir_all(root.join("present")).expect("must create");
    let locator = locator_with(&root, &[("demo", "demo-folder")]);

    assert_eq!(
        locator.folder_for_app("demo"),
        Some(root.join("demo-folder"))
    );
    assert_eq!(locator.folder_for_app("present"), Some(root.join("present")));
    assert_eq!(locator.folder_for_app("absent"), None);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn filename_parsing_finds_version_after_any_dash() {
    assert_eq!(update_file_stem("app-1.2.0.tar.gz"), Some("app-1.2.0"));
    assert_eq!(update_file_stem("tool.exe"), Some("tool"));
    assert_eq!(update_file_stem("notes-1.2.0.zip"), None);

    assert_eq!(version_from_stem("my-app-1.2.0"), Some(version("1.2.0")));
    assert_eq!(
        version_from_stem("demo-1.1.0-beta.ab12cd3"),
        Some(version("1.1.0-beta.ab12cd3"))
    );
    assert_eq!(version_from_stem("app"), None);
    assert_eq!(version_from_stem("app-nightly"), None);
}

#[test]
fn scan_picks_highest_version_and_honors_prerelease_flag() {
    let root = test_root("scan");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.0.0.tar.gz"), b"stable old");
    touch(&folder.join("demo-1.2.0.tar.gz"), b"stable new");
    touch(&folder.join("demo-1.3.0-beta.ab12cd3.tar.gz"), b"beta");
    touch(&folder.join("readme.txt"), b"not a candidate");

    let locator = locator_with(&root, &[]);

    let stable = locator
        .scan_latest(&folder, false)
        .expect("scan must succeed")
        .expect("must find a stable candidate");
    assert_eq!(stable.version, Some(version("1.2.0")));

    let prerelease = locator
        .scan_latest(&folder, true)
        .expect("scan must succeed")
        .expect("must find a pre-release candidate");
    assert_eq!(prerelease.version, Some(version("1.3.0-beta.ab12cd3")));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn wildcard_file_outranks_every_versioned_file() {
    let root = test_root("wildcard");
    let folder = root.join("demo");
    // The wildcard is written first, so it is the older file.
    touch(&folder.join("demo.tar.gz"), b"wildcard");
    touch(&folder.join("demo-1.2.0.tar.gz"), b"versioned");

    let locator = locator_with(&root, &[]);
    let best = locator
        .scan_latest(&folder, false)
        .expect("scan must succeed")
        .expect("must find a candidate");
    assert!(best.is_wildcard());
    assert_eq!(best.file_name(), "demo.tar.gz");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn newer_of_two_wildcards_wins_by_mtime() {
    let root = test_root("wildcard-mtime");
    let folder = root.join("demo");
    touch(&folder.join("demo.tar.gz"), b"older");
    touch(&folder.join("demo-latest.tar.gz"), b"newer");

    let locator = locator_with(&root, &[]);
    let best = locator
        .scan_latest(&folder, false)
        .expect("scan must succeed")
        .expect("must find a candidate");
    assert_eq!(best.file_name(), "demo-latest.tar.gz");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn check_version_compares_version_then_timestamp() {
    let root = test_root("check");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.1.0.tar.gz"), b"payload");
    let locator = locator_with(&root, &[]);

    // No version and no timestamp: out of date by definition.
    assert!(!locator
        .check_version(&folder, None, None, None, false)
        .expect("check must succeed"));

    // Server strictly newer by version.
    assert!(!locator
        .check_version(&folder, Some(&version("1.0.0")), None, None, false)
        .expect("check must succeed"));

    // Client current.
    assert!(locator
        .check_version(&folder, Some(&version("1.1.0")), None, None, false)
        .expect("check must succeed"));

    // Server file modified after the client's stated timestamp.
    let stale = std::time::SystemTime::UNIX_EPOCH;
    assert!(!locator
        .check_version(&folder, Some(&version("1.1.0")), Some(stale), None, false)
        .expect("check must succeed"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn check_version_checksum_is_final_authority() {
    let root = test_root("check-sum");
    let folder = root.join("demo");
    touch(&folder.join("demo-2.0.0.tar.gz"), b"payload");
    let locator = locator_with(&root, &[]);

    let matching = sha256_file_hex(&folder.join("demo-2.0.0.tar.gz")).expect("must hash");

    // Version says out of date, checksum equality overrides.
    assert!(locator
        .check_version(&folder, Some(&version("1.0.0")), None, Some(&matching), false)
        .expect("check must succeed"));

    // Version says current, checksum disagreement overrides.
    assert!(!locator
        .check_version(&folder, Some(&version("2.0.0")), None, Some("ff00"), false)
        .expect("check must succeed"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn load_manifests_tolerates_missing_dir_and_bad_files() {
    let root = test_root("manifests");
    assert!(load_manifests(&root.join("absent"))
        .expect("missing dir must be empty")
        .is_empty());

    let dir = root.join("manifests");
    touch(&dir.join("good.json"), manifest_json("good", 1, &[], "1.1.0").as_bytes());
    touch(&dir.join("broken.json"), b"{ not json");
    touch(&dir.join("ignored.toml"), b"id = 'nope'");

    let manifests = load_manifests(&dir).expect("batch must survive bad files");
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].id, "good");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn load_manifests_skips_duplicate_ids() {
    let root = test_root("dup");
    let dir = root.join("manifests");
    touch(&dir.join("a.json"), manifest_json("same", 1, &[], "1.1.0").as_bytes());
    touch(&dir.join("b.json"), manifest_json("same", 2, &[], "1.1.0").as_bytes());

    let manifests = load_manifests(&dir).expect("must load");
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].priority, 1);

    let _ = fs::remove_dir_all(&root);
}

fn demo_resolver(root: &Path) -> UpgradeResolver {
    UpgradeResolver::new(locator_with(root, &[("demo", "demo")]))
}

#[test]
fn dependency_order_respects_priority_then_dfs() {
    let root = test_root("order");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.1.0.tar.gz"), b"latest");
    let dir = folder.join("manifests");
    touch(&dir.join("a.json"), manifest_json("a", 3, &[], "1.1.0").as_bytes());
    touch(&dir.join("b.json"), manifest_json("b", 1, &["a"], "1.1.0").as_bytes());
    touch(&dir.join("c.json"), manifest_json("c", 2, &[], "1.1.0").as_bytes());

    let resolver = demo_resolver(&root);
    let client = version("1.1.0");

    let first = resolver
        .applicable_upgrades("demo", &client, false, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");
    let ids = first.upgrade_ids();

    let a = ids.iter().position(|id| id == "a").expect("a must appear");
    let b = ids.iter().position(|id| id == "b").expect("b must appear");
    assert!(a < b, "dependency a must precede dependent b: {ids:?}");
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(first.estimated_size, 300);

    // Identical input resolves to an identical order.
    let second = resolver
        .applicable_upgrades("demo", &client, false, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");
    assert_eq!(second.upgrade_ids(), ids);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn dependency_cycle_fails_the_resolution() {
    let root = test_root("cycle");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.1.0.tar.gz"), b"latest");
    let dir = folder.join("manifests");
    touch(&dir.join("x.json"), manifest_json("x", 1, &["y"], "1.1.0").as_bytes());
    touch(&dir.join("y.json"), manifest_json("y", 2, &["x"], "1.1.0").as_bytes());

    let resolver = demo_resolver(&root);
    let err = resolver
        .applicable_upgrades("demo", &version("1.0.0"), false, None)
        .expect_err("cycle must abort resolution");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DependencyCycle(_))
    ));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn conflicting_manifest_is_dropped_in_priority_order() {
    let root = test_root("conflict");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.1.0.tar.gz"), b"latest");
    let dir = folder.join("manifests");
    touch(&dir.join("keep.json"), manifest_json("keep", 1, &[], "1.1.0").as_bytes());
    let clashing = r#"{"id": "clash", "name": "clash", "version": "1.1.0",
        "appliesTo": {"minVersion": "0.1.0"}, "targetVersion": "1.1.0",
        "priority": 5, "conflicts": ["keep"]}"#;
    touch(&dir.join("clash.json"), clashing.as_bytes());

    let resolver = demo_resolver(&root);
    let result = resolver
        .applicable_upgrades("demo", &version("1.1.0"), false, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");
    assert_eq!(result.upgrade_ids(), vec!["keep"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn filter_honors_applicability_and_target_cap() {
    let root = test_root("filter");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.1.0.tar.gz"), b"latest");
    let dir = folder.join("manifests");
    // Applies only from 2.0.0: out of range for a 1.0.0 client.
    let out_of_range = r#"{"id": "future", "name": "future", "version": "2.1.0",
        "appliesTo": {"minVersion": "2.0.0"}, "targetVersion": "1.1.0"}"#;
    touch(&dir.join("future.json"), out_of_range.as_bytes());
    // Targets a version beyond the latest published artifact.
    touch(&dir.join("beyond.json"), manifest_json("beyond", 1, &[], "9.0.0").as_bytes());
    touch(&dir.join("fits.json"), manifest_json("fits", 1, &[], "1.1.0").as_bytes());

    let resolver = demo_resolver(&root);
    let result = resolver
        .applicable_upgrades("demo", &version("1.0.0"), false, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");

    let ids = result.upgrade_ids();
    assert!(ids.contains(&"fits".to_string()));
    assert!(!ids.contains(&"future".to_string()));
    assert!(!ids.contains(&"beyond".to_string()));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn outdated_client_gets_synthetic_app_update() {
    let root = test_root("demo-e2e");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.0.0.tar.gz"), b"stable");
    touch(&folder.join("demo-1.1.0-beta.ab12cd3.tar.gz"), b"beta");

    let resolver = demo_resolver(&root);

    // Stable track tops out at 1.0.0, so a 1.0.0 client is current.
    let current = resolver
        .applicable_upgrades("demo", &version("1.0.0"), false, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");
    assert!(current.is_up_to_date());
    assert_eq!(current.target_version, version("1.0.0"));

    // A 0.9.0 client gets the synthetic app update targeting 1.0.0.
    let outdated = resolver
        .applicable_upgrades("demo", &version("0.9.0"), false, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");
    assert_eq!(outdated.upgrade_ids(), vec!["app-update"]);
    assert_eq!(outdated.target_version, version("1.0.0"));
    let entry = &outdated.upgrades[0];
    assert_eq!(entry.kind, ManifestKind::AppUpdate);
    assert!(entry.files.is_empty());
    let staged = outdated.update_file.as_ref().expect("must carry artifact");
    assert_eq!(staged.file_name(), "demo-1.0.0.tar.gz");

    // The pre-release track serves the beta when opted in.
    let prerelease = resolver
        .applicable_upgrades("demo", &version("1.0.0"), true, None)
        .expect("resolution must succeed")
        .expect("demo must resolve");
    assert_eq!(prerelease.target_version, version("1.1.0-beta.ab12cd3"));
    assert_eq!(prerelease.upgrade_ids(), vec!["app-update"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn self_update_appends_after_app_update() {
    let root = test_root("self-update");
    let folder = root.join("demo");
    touch(&folder.join("demo-1.1.0.tar.gz"), b"latest");
    touch(&root.join("updater/updater-2.1.0.tar.gz"), b"updater");

    let resolver = demo_resolver(&root);
    let result = resolver
        .applicable_upgrades("demo", &version("1.0.0"), false, Some(&version("2.0.0")))
        .expect("resolution must succeed")
        .expect("demo must resolve");

    assert_eq!(result.upgrade_ids(), vec!["app-update", "self-update"]);
    let last = result.upgrades.last().expect("must have entries");
    assert_eq!(last.kind, ManifestKind::SelfUpdate);
    assert_eq!(last.target_version, version("2.1.0"));
    assert!(result.updater_file.is_some());

    // An installer already at the newest updater version stays put.
    let current = resolver
        .applicable_upgrades("demo", &version("1.0.0"), false, Some(&version("2.1.0")))
        .expect("resolution must succeed")
        .expect("demo must resolve");
    assert_eq!(current.upgrade_ids(), vec!["app-update"]);
    assert!(current.updater_file.is_none());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unknown_app_resolves_to_none() {
    let root = test_root("unknown");
    let resolver = demo_resolver(&root);
    let result = resolver
        .applicable_upgrades("nope", &version("1.0.0"), false, None)
        .expect("resolution must succeed");
    assert!(result.is_none());

    let _ = fs::remove_dir_all(&root);
}
