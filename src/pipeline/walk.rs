//! Crawl sources: turn a directory tree or a path list into a stream of [`FileResource`]s.
//!
//! A source is a factory that is opened on the crawler thread, so the underlying iterator
//! (walkdir, jwalk, a SQLite cursor) never has to cross threads.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::engine::tools::{path_relative_to, path_to_id_string, should_include_in_walk};
use crate::{FileResource, MetaKeys};

/// One result from a directory walk: either a path to consider or an error with optional path.
pub enum WalkOutcome {
    Ok(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// What a crawl source yields: a candidate resource, or a path it could not turn into one.
#[derive(Debug)]
pub enum CrawlOutcome {
    Resource(FileResource),
    Skipped { msg: String, path: Option<PathBuf> },
}

pub type CrawlIter = Box<dyn Iterator<Item = CrawlOutcome>>;

/// Deferred source; called once on the crawler thread.
pub type CrawlSource = Box<dyn FnOnce() -> Result<CrawlIter> + Send>;

/// Settings for walking a directory tree.
#[derive(Clone, Debug)]
pub struct WalkContext {
    pub root: PathBuf,
    /// Never crawl into this directory (usually the extraction output dir).
    pub exclude_dir: Option<PathBuf>,
    pub follow_links: bool,
    pub parallel_walk: bool,
}

/// Convert a jwalk result into [`WalkOutcome`].
pub fn to_outcome_jwalk(r: Result<jwalk::DirEntry<((), ())>, jwalk::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => WalkOutcome::Ok(entry.path().to_path_buf()),
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => WalkOutcome::Ok(entry.into_path()),
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

fn jwalk_iter(ctx: &WalkContext) -> Box<dyn Iterator<Item = WalkOutcome>> {
    use jwalk::Parallelism;
    use std::time::Duration;
    Box::new(
        jwalk::WalkDir::new(&ctx.root)
            .follow_links(ctx.follow_links)
            .sort(true)
            .parallelism(Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_secs(60),
            })
            .into_iter()
            .map(to_outcome_jwalk),
    )
}

fn walkdir_iter(ctx: &WalkContext) -> Box<dyn Iterator<Item = WalkOutcome>> {
    use walkdir::WalkDir;
    Box::new(
        WalkDir::new(&ctx.root)
            .follow_links(ctx.follow_links)
            .sort_by_file_name()
            .into_iter()
            .map(to_outcome_walkdir),
    )
}

/// Stat `abs_path` and build a resource keyed by its path relative to `root`.
/// Returns `None` for anything that is not a regular file.
pub fn resource_from_path(abs_path: &Path, root: &Path) -> Result<Option<FileResource>> {
    let meta = std::fs::metadata(abs_path)
        .with_context(|| format!("read metadata for {}", abs_path.display()))?;
    if !meta.is_file() {
        return Ok(None);
    }
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    let rel = path_relative_to(abs_path, root).unwrap_or_else(|| abs_path.to_path_buf());
    let id = path_to_id_string(&rel);
    let name = abs_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = abs_path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    Ok(Some(
        FileResource::new(id.clone(), abs_path)
            .with_meta(MetaKeys::PATH, id)
            .with_meta(MetaKeys::NAME, name)
            .with_meta(MetaKeys::EXTENSION, extension)
            .with_meta(MetaKeys::SIZE, meta.len())
            .with_meta(MetaKeys::MTIME_NS, mtime_ns),
    ))
}

/// Outcome for one candidate path (walked or listed). Non-files are dropped silently.
pub fn listed_outcome(abs: PathBuf, root: &Path) -> Option<CrawlOutcome> {
    match resource_from_path(&abs, root) {
        Ok(Some(resource)) => Some(CrawlOutcome::Resource(resource)),
        Ok(None) => None,
        Err(e) => Some(CrawlOutcome::Skipped {
            msg: format!("{:#}", e),
            path: Some(abs),
        }),
    }
}

fn walk_to_crawl(outcome: WalkOutcome, ctx: &WalkContext) -> Option<CrawlOutcome> {
    match outcome {
        WalkOutcome::Ok(path) => {
            if !should_include_in_walk(&path, &ctx.root, &ctx.exclude_dir) {
                return None;
            }
            listed_outcome(path, &ctx.root)
        }
        WalkOutcome::Err { msg, path } => Some(CrawlOutcome::Skipped { msg, path }),
    }
}

/// Walk `ctx.root` (serially with walkdir, or in parallel with jwalk), yielding regular files.
pub fn directory_source(ctx: WalkContext) -> CrawlSource {
    Box::new(move || {
        let root = ctx
            .root
            .canonicalize()
            .with_context(|| format!("canonicalize crawl root {}", ctx.root.display()))?;
        let ctx = WalkContext {
            root,
            exclude_dir: ctx.exclude_dir.as_ref().and_then(|p| p.canonicalize().ok()),
            ..ctx
        };
        let iter = match ctx.parallel_walk {
            true => jwalk_iter(&ctx),
            false => walkdir_iter(&ctx),
        };
        Ok(Box::new(iter.filter_map(move |o| walk_to_crawl(o, &ctx))) as CrawlIter)
    })
}

/// Read a list file: one path per line, relative to `root`. Blank lines and `#` comments ignored.
pub fn list_source(root: PathBuf, list_path: PathBuf) -> CrawlSource {
    Box::new(move || {
        let file = std::fs::File::open(&list_path)
            .with_context(|| format!("open file list {}", list_path.display()))?;
        let lines = BufReader::new(file).lines();
        Ok(Box::new(lines.filter_map(move |line| {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    return Some(CrawlOutcome::Skipped {
                        msg: format!("read file list: {}", e),
                        path: None,
                    });
                }
            };
            let rel = line.trim();
            if rel.is_empty() || rel.starts_with('#') {
                return None;
            }
            listed_outcome(root.join(rel), &root)
        })) as CrawlIter)
    })
}

/// In-memory source, handy for embedding and tests.
pub fn vec_source(resources: Vec<FileResource>) -> CrawlSource {
    Box::new(move || Ok(Box::new(resources.into_iter().map(CrawlOutcome::Resource)) as CrawlIter))
}
