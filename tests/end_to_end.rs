//! End-to-end scenarios: a live `Service` watching a real directory,
//! writing real files, and asserting against what actually landed in
//! the store. Debounce intervals here are scaled down so the suite runs
//! quickly, but the *relative* timing (parent fires before child, etc.)
//! is preserved.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lochist::{Config, HistoryEntry, LoggingNotifier, Service};
use tempfile::TempDir;

fn start_service(cfg_dir: &Path, db_dir: &Path, groups_json: &str) -> Service {
    let db_path = db_dir.join("history.db");
    let config_json = format!(
        r#"{{"db_path": {db_path:?}, "watch_groups": {groups_json}}}"#,
        db_path = db_path.to_string_lossy(),
    );
    let config_path = cfg_dir.join("lochist.json");
    fs::write(&config_path, config_json).unwrap();

    let config = Config::load(&config_path).expect("valid config");
    Service::start(config, Arc::new(LoggingNotifier)).expect("service starts")
}

/// Fetches the bytes of every Save history entry whose path contains
/// `needle`, decompressing each via `Store::get_snapshot`.
fn saved_contents(service: &Service, needle: &str) -> Vec<Vec<u8>> {
    let history = service
        .store()
        .get_recent_history(100, 0, Some(needle), None)
        .expect("history query");
    history
        .into_iter()
        .filter_map(|entry| match entry {
            HistoryEntry::Save { id, .. } => Some(id),
            HistoryEntry::Rename { .. } => None,
        })
        .map(|id| {
            service
                .store()
                .get_snapshot(&id)
                .expect("snapshot query")
                .expect("snapshot exists")
                .data
        })
        .collect()
}

fn save_count(service: &Service, needle: &str) -> usize {
    service
        .store()
        .get_recent_history(100, 0, Some(needle), None)
        .expect("history query")
        .into_iter()
        .filter(|e| matches!(e, HistoryEntry::Save { .. }))
        .count()
}

#[test]
fn debounce_collapses_a_burst() {
    let watch_dir = TempDir::new().unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let groups = format!(
        r#"[{{"name": "w1", "dirs": [{:?}], "debounce_sec": 1, "max_snapshots": 0}}]"#,
        watch_dir.path().to_string_lossy()
    );
    let service = start_service(cfg_dir.path(), db_dir.path(), &groups);

    let file = watch_dir.path().join("test.txt");
    for content in ["c0", "c1", "c2", "c3", "c4"] {
        fs::write(&file, content).unwrap();
        thread::sleep(Duration::from_millis(100));
    }

    thread::sleep(Duration::from_millis(1_500));

    let contents = saved_contents(&service, "test.txt");
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0], b"c4");

    service.shutdown();
}

#[test]
fn duplicate_content_is_suppressed() {
    let watch_dir = TempDir::new().unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let groups = format!(
        r#"[{{"name": "w1", "dirs": [{:?}], "debounce_sec": 1, "max_snapshots": 0}}]"#,
        watch_dir.path().to_string_lossy()
    );
    let service = start_service(cfg_dir.path(), db_dir.path(), &groups);

    let file = watch_dir.path().join("dup.txt");
    fs::write(&file, "first write").unwrap();
    thread::sleep(Duration::from_millis(1_500));
    fs::write(&file, "first write").unwrap();
    thread::sleep(Duration::from_millis(1_500));

    assert_eq!(save_count(&service, "dup.txt"), 1);

    service.shutdown();
}

#[test]
fn retention_trims_to_n() {
    let watch_dir = TempDir::new().unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let groups = format!(
        r#"[{{"name": "w1", "dirs": [{:?}], "debounce_sec": 1, "max_snapshots": 3}}]"#,
        watch_dir.path().to_string_lossy()
    );
    let service = start_service(cfg_dir.path(), db_dir.path(), &groups);

    let file = watch_dir.path().join("max.go");
    for content in ["v0", "v1", "v2", "v3", "v4"] {
        fs::write(&file, content).unwrap();
        thread::sleep(Duration::from_millis(1_300));
    }

    let contents = saved_contents(&service, "max.go");
    assert_eq!(contents.len(), 3);
    let set: HashSet<Vec<u8>> = contents.into_iter().collect();
    let expected: HashSet<Vec<u8>> = ["v2", "v3", "v4"].iter().map(|s| s.as_bytes().to_vec()).collect();
    assert_eq!(set, expected);

    service.shutdown();
}

#[test]
fn rename_pairing_produces_a_full_history() {
    let watch_dir = TempDir::new().unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let groups = format!(
        r#"[{{"name": "w1", "dirs": [{:?}], "debounce_sec": 1, "max_snapshots": 0}}]"#,
        watch_dir.path().to_string_lossy()
    );
    let service = start_service(cfg_dir.path(), db_dir.path(), &groups);

    let a = watch_dir.path().join("a.txt");
    let b = watch_dir.path().join("b.txt");
    fs::write(&a, "X").unwrap();
    thread::sleep(Duration::from_millis(1_500));

    fs::rename(&a, &b).unwrap();
    thread::sleep(Duration::from_millis(1_500));

    let history = service
        .store()
        .get_recent_history(100, 0, Some("b.txt"), None)
        .expect("history query");

    let has_rename = history.iter().any(|e| {
        matches!(e, HistoryEntry::Rename { old_path, new_path, .. }
            if old_path.ends_with("a.txt") && new_path.ends_with("b.txt"))
    });
    let has_save = history
        .iter()
        .any(|e| matches!(e, HistoryEntry::Save { path, .. } if path.ends_with("b.txt")));

    assert!(has_rename, "expected a rename entry a.txt -> b.txt");
    assert!(has_save, "expected a fresh save on b.txt");

    service.shutdown();
}

#[test]
fn binary_file_rejected_with_no_extension_filter() {
    let watch_dir = TempDir::new().unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let groups = format!(
        r#"[{{"name": "w2", "dirs": [{:?}], "extensions": null, "debounce_sec": 1, "max_snapshots": 0}}]"#,
        watch_dir.path().to_string_lossy()
    );
    let service = start_service(cfg_dir.path(), db_dir.path(), &groups);

    fs::write(watch_dir.path().join("test.txt"), "hello world").unwrap();
    fs::write(
        watch_dir.path().join("test.bin"),
        [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D],
    )
    .unwrap();

    thread::sleep(Duration::from_millis(1_500));

    assert_eq!(save_count(&service, "test.txt"), 1);
    assert_eq!(save_count(&service, "test.bin"), 0);

    service.shutdown();
}

#[test]
fn longest_prefix_group_selection_with_per_group_policy() {
    let root = TempDir::new().unwrap();
    let sub = root.path().join("sub");
    fs::create_dir(&sub).unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let groups = format!(
        r#"[
            {{"name": "parent", "dirs": [{:?}], "debounce_sec": 1, "max_snapshots": 0}},
            {{"name": "child", "dirs": [{:?}], "debounce_sec": 2, "max_snapshots": 5}}
        ]"#,
        root.path().to_string_lossy(),
        sub.to_string_lossy()
    );
    let service = start_service(cfg_dir.path(), db_dir.path(), &groups);

    fs::write(root.path().join("p.txt"), "p").unwrap();
    fs::write(sub.join("c.txt"), "c").unwrap();

    thread::sleep(Duration::from_millis(1_300));
    assert_eq!(save_count(&service, "p.txt"), 1);
    assert_eq!(save_count(&service, "c.txt"), 0);

    thread::sleep(Duration::from_millis(1_300));
    assert_eq!(save_count(&service, "c.txt"), 1);

    service.shutdown();
}
