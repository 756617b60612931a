//! Workspace cache persistence through the filesystem.

use tsn::types::module_id_from_path;
use tsn::WorkspaceIndex;

#[test]
fn save_and_load_through_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let mut idx = WorkspaceIndex::new(root.to_str().unwrap());
    let module = module_id_from_path("scripts/main.tsn");
    idx.record("scripts/main.tsn", 512, 1_700_000_000_000, module);
    idx.save(root).unwrap();

    let loaded = WorkspaceIndex::load_or_default(root, "unused");
    assert_eq!(loaded, idx);
    assert_eq!(loaded.path_of(module), Some("scripts/main.tsn"));
}

#[test]
fn corrupt_cache_falls_back_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(WorkspaceIndex::cache_file(root), b"not a cache").unwrap();

    let loaded = WorkspaceIndex::load_or_default(root, "/proj");
    assert!(loaded.scripts.is_empty());
    assert_eq!(loaded.workspace_root, "/proj");
}

#[test]
fn missing_cache_falls_back_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = WorkspaceIndex::load_or_default(dir.path(), "/proj");
    assert!(loaded.scripts.is_empty());
}

#[test]
fn recompiling_a_script_updates_its_entry() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let mut idx = WorkspaceIndex::new(root.to_str().unwrap());
    let module = module_id_from_path("a.tsn");
    idx.record("a.tsn", 10, 100, module);
    let first_cached = idx.script("a.tsn").unwrap().cached_on;
    idx.record("a.tsn", 20, 200, module);

    assert_eq!(idx.scripts.len(), 1);
    assert_eq!(idx.id_map.len(), 1);
    let entry = idx.script("a.tsn").unwrap();
    assert_eq!(entry.size, 20);
    assert!(entry.cached_on >= first_cached);
    idx.save(root).unwrap();
}
