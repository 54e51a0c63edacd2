//! SQLite file listing: a `files(path)` table of paths relative to a root, read in keyset pages.

use anyhow::{Context, Result};
use log::debug;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::pipeline::walk::{CrawlIter, CrawlOutcome, CrawlSource, listed_outcome};
use crate::utils::config::DB_LIST_PAGE_SIZE;

/// Schema of a file listing.
pub(crate) const LISTING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY
);
"#;

/// WAL tuning pragmas. Use after PRAGMA journal_mode = WAL.
const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        "#;

const PAGE_SQL: &str = "SELECT path FROM files WHERE path > ?1 ORDER BY path LIMIT ?2";

/// Open or create a listing DB with WAL and the `files` table.
pub fn create_listing(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).context("open listing database")?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(LISTING_SCHEMA).context("create schema")?;
    Ok(conn)
}

/// Insert relative paths in one transaction; duplicates are ignored. Returns rows inserted.
pub fn add_listing_paths<S: AsRef<str>>(conn: &mut Connection, paths: &[S]) -> Result<usize> {
    let tx = conn.transaction().context("begin transaction")?;
    let mut inserted = 0;
    {
        let mut stmt = tx
            .prepare("INSERT OR IGNORE INTO files (path) VALUES (?1)")
            .context("prepare insert")?;
        for p in paths {
            inserted += stmt.execute([p.as_ref()]).context("insert path")?;
        }
    }
    tx.commit().context("commit transaction")?;
    Ok(inserted)
}

/// Open an existing listing for queries only and check it has a `files` table.
/// Opened read-write (never created) so a WAL-mode file can be read without its `-shm`.
pub fn open_listing(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("open listing database {}", path.display()))?;
    conn.pragma_update(None, "query_only", true)
        .context("set query_only")?;
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'files'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("inspect listing schema")?;
    if found.is_none() {
        anyhow::bail!("{} has no files table", path.display());
    }
    Ok(conn)
}

/// Pages through `files` ordered by path, `DB_LIST_PAGE_SIZE` rows at a time.
struct ListingPages {
    conn: Connection,
    root: PathBuf,
    last: String,
    page: VecDeque<String>,
    done: bool,
}

impl ListingPages {
    fn fetch(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(PAGE_SQL).context("prepare page")?;
        let rows = stmt
            .query_map((self.last.as_str(), DB_LIST_PAGE_SIZE), |row| {
                row.get::<_, String>(0)
            })
            .context("query page")?;
        for row in rows {
            self.page.push_back(row.context("read row")?);
        }
        if (self.page.len() as i64) < DB_LIST_PAGE_SIZE {
            self.done = true;
        }
        if let Some(last) = self.page.back() {
            self.last = last.clone();
        }
        debug!("listing: fetched {} paths", self.page.len());
        Ok(())
    }
}

impl Iterator for ListingPages {
    type Item = CrawlOutcome;

    fn next(&mut self) -> Option<CrawlOutcome> {
        loop {
            if self.page.is_empty() {
                if self.done {
                    return None;
                }
                if let Err(e) = self.fetch() {
                    self.done = true;
                    return Some(CrawlOutcome::Skipped {
                        msg: format!("{:#}", e),
                        path: None,
                    });
                }
                continue;
            }
            let rel = self.page.pop_front()?;
            if let Some(outcome) = listed_outcome(self.root.join(&rel), &self.root) {
                return Some(outcome);
            }
        }
    }
}

/// Crawl the paths stored in the SQLite listing at `db_path`, resolved against `root`.
pub fn sqlite_source(root: PathBuf, db_path: PathBuf) -> CrawlSource {
    Box::new(move || {
        let conn = open_listing(&db_path)?;
        Ok(Box::new(ListingPages {
            conn,
            root,
            last: String::new(),
            page: VecDeque::new(),
            done: false,
        }) as CrawlIter)
    })
}
