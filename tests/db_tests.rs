//! SQLite listing tests: schema, inserts, keyset paging through the crawl source.

use batchguard::engine::{add_listing_paths, create_listing, open_listing, sqlite_source};
use batchguard::pipeline::CrawlOutcome;
use batchguard::utils::config::DB_LIST_PAGE_SIZE;

#[test]
fn test_add_listing_paths_ignores_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = create_listing(&dir.path().join("files.db")).unwrap();
    assert_eq!(add_listing_paths(&mut conn, &["a.txt", "b.txt"]).unwrap(), 2);
    assert_eq!(add_listing_paths(&mut conn, &["b.txt", "c.txt"]).unwrap(), 1);
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 3);
}

#[test]
fn test_open_listing_requires_files_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other.db");
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE paths (path TEXT PRIMARY KEY);")
        .unwrap();
    assert!(open_listing(&path).is_err());
}

#[test]
fn test_sqlite_source_yields_existing_files_in_path_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("b.txt"), "bb").unwrap();
    std::fs::write(root.join("sub/a.txt"), "a").unwrap();

    let db_path = dir.path().join("files.db");
    let mut conn = create_listing(&db_path).unwrap();
    add_listing_paths(&mut conn, &["sub/a.txt", "b.txt", "missing.txt", "sub"]).unwrap();
    drop(conn);

    let outcomes: Vec<CrawlOutcome> = sqlite_source(root.clone(), db_path)().unwrap().collect();
    let ids: Vec<String> = outcomes
        .iter()
        .filter_map(|o| match o {
            CrawlOutcome::Resource(r) => Some(r.id.clone()),
            CrawlOutcome::Skipped { .. } => None,
        })
        .collect();
    assert_eq!(ids, vec!["b.txt", "sub/a.txt"]);
    // The missing file is reported; the directory is silently dropped.
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, CrawlOutcome::Skipped { .. }))
        .count();
    assert_eq!(skipped, 1);
}

#[test]
fn test_sqlite_source_pages_past_one_page() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    std::fs::create_dir_all(&root).unwrap();
    let total = DB_LIST_PAGE_SIZE as usize * 2 + 7;
    let paths: Vec<String> = (0..total).map(|i| format!("gone/{i:05}.bin")).collect();

    let db_path = dir.path().join("files.db");
    let mut conn = create_listing(&db_path).unwrap();
    add_listing_paths(&mut conn, &paths).unwrap();
    drop(conn);

    let seen = sqlite_source(root, db_path)().unwrap().count();
    assert_eq!(seen, total);
}
