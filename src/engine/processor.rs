//! Per-item processing plugins. The consumer hands each resource to a [`FileProcessor`];
//! what happens to the file is up to the plugin.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::FileResource;
use crate::engine::tools::expand_placeholders;
use crate::error::BatchError;

/// Per-item callback run on consumer threads.
///
/// `process` returns whether the item was processed. Expected per-item failures must be
/// handled inside and reported through counters, returning `Ok(false)`. An `Err` ends the
/// consumer and, through it, the run; wrap it in [`BatchError::NoRestart`] when retrying
/// the batch cannot help.
pub trait FileProcessor: Send + Sync {
    fn process(&self, resource: &FileResource) -> Result<bool>;

    /// Release shared resources at the end of a run. May be slow.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

impl<F> FileProcessor for F
where
    F: Fn(&FileResource) -> Result<bool> + Send + Sync,
{
    fn process(&self, resource: &FileResource) -> Result<bool> {
        self(resource)
    }
}

/// Side-channel counters for per-item outcomes.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub extracted: AtomicUsize,
    pub skipped_existing: AtomicUsize,
    pub failed: AtomicUsize,
}

impl ProcessorStats {
    pub fn extracted(&self) -> usize {
        self.extracted.load(Ordering::Relaxed)
    }

    pub fn skipped_existing(&self) -> usize {
        self.skipped_existing.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Settings for [`CommandProcessor`].
#[derive(Clone, Debug)]
pub struct CommandSettings {
    /// Program and arguments; `{input}` and `{output}` are substituted per item.
    pub command: Vec<String>,
    pub output_dir: PathBuf,
    pub output_suffix: String,
    /// Re-extract when the output already exists.
    pub overwrite: bool,
}

/// How often a consumer checks whether its extractor has exited.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// A launched extractor and the output it is writing.
struct RunningExtractor {
    child: Child,
    output: PathBuf,
}

/// Extractors still running, keyed by launch number. Closed by `shutdown`.
#[derive(Default)]
struct Registry {
    running: BTreeMap<u64, RunningExtractor>,
    closed: bool,
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("extractor {}: kill: {}", child.id(), e);
    }
    let _ = child.wait();
}

/// Runs an external extraction command once per file, writing under `output_dir`.
/// Every extractor is tracked until it exits, so `shutdown` can kill the ones a hung
/// consumer left behind.
pub struct CommandProcessor {
    settings: CommandSettings,
    writes_to_stdout: bool,
    stats: ProcessorStats,
    registry: Mutex<Registry>,
    next_key: AtomicU64,
}

impl CommandProcessor {
    pub fn new(settings: CommandSettings) -> Result<Self> {
        if settings.command.is_empty() {
            return Err(BatchError::Config("extract command is empty".into()).into());
        }
        std::fs::create_dir_all(&settings.output_dir).with_context(|| {
            format!("create output dir {}", settings.output_dir.display())
        })?;
        let writes_to_stdout = !settings.command.iter().any(|a| a.contains("{output}"));
        Ok(Self {
            settings,
            writes_to_stdout,
            stats: ProcessorStats::default(),
            registry: Mutex::new(Registry::default()),
            next_key: AtomicU64::new(0),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Extractor processes currently running.
    pub fn running_extractors(&self) -> usize {
        self.registry().running.len()
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Output path: relative path of the item under `output_dir`, plus the suffix.
    pub fn output_path(&self, resource: &FileResource) -> PathBuf {
        output_path_for(
            &self.settings.output_dir,
            resource.relative_path(),
            &self.settings.output_suffix,
        )
    }

    fn run_command(&self, input: &Path, output: &Path) -> Result<std::process::ExitStatus> {
        let argv: Vec<String> = self
            .settings
            .command
            .iter()
            .map(|a| expand_placeholders(a, input, output))
            .collect();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BatchError::Config("extract command is empty".into()))?;
        // Without an `{output}` argument the extractor's stdout becomes the output file.
        let stdout = if self.writes_to_stdout {
            let file = std::fs::File::create(output)
                .with_context(|| format!("create output {}", output.display()))?;
            Stdio::from(file)
        } else {
            Stdio::null()
        };
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(output);
                if e.kind() == std::io::ErrorKind::NotFound {
                    return Err(
                        BatchError::NoRestart(format!("extractor not found: {}", program)).into(),
                    );
                }
                return Err(e).with_context(|| format!("spawn extractor {}", program));
            }
        };

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        {
            let mut reg = self.registry();
            if reg.closed {
                drop(reg);
                reap(&mut child);
                let _ = std::fs::remove_file(output);
                bail!("processor is shut down; extractor for {} not run", input.display());
            }
            reg.running.insert(
                key,
                RunningExtractor {
                    child,
                    output: output.to_path_buf(),
                },
            );
        }
        self.wait_for(key)
    }

    /// Poll the extractor registered under `key` until it exits or `shutdown` takes it.
    fn wait_for(&self, key: u64) -> Result<std::process::ExitStatus> {
        loop {
            {
                let mut reg = self.registry();
                let Some(running) = reg.running.get_mut(&key) else {
                    bail!("extractor killed at shutdown");
                };
                match running.child.try_wait() {
                    Ok(Some(status)) => {
                        reg.running.remove(&key);
                        return Ok(status);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        if let Some(mut lost) = reg.running.remove(&key) {
                            reap(&mut lost.child);
                        }
                        return Err(e).context("wait for extractor");
                    }
                }
            }
            thread::sleep(EXIT_POLL);
        }
    }
}

impl FileProcessor for CommandProcessor {
    fn process(&self, resource: &FileResource) -> Result<bool> {
        let output = self.output_path(resource);
        if !self.settings.overwrite && output.exists() {
            debug!("output exists, skipping {}", resource.id);
            self.stats.skipped_existing.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        if let Some(parent) = output.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!("{}: cannot create {}: {}", resource.id, parent.display(), e);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        let status = self.run_command(&resource.path, &output)?;
        if status.success() {
            self.stats.extracted.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            warn!("{}: extractor exited with {}", resource.id, status);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            // Partial output would be mistaken for a finished one on the next run.
            let _ = std::fs::remove_file(&output);
            Ok(false)
        }
    }

    fn shutdown(&self) -> Result<()> {
        let left = {
            let mut reg = self.registry();
            reg.closed = true;
            std::mem::take(&mut reg.running)
        };
        for (_, mut running) in left {
            warn!(
                "killing extractor {} still writing {}",
                running.child.id(),
                running.output.display()
            );
            reap(&mut running.child);
            // Partial output would be mistaken for a finished one on the next run.
            let _ = std::fs::remove_file(&running.output);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            "extraction: {} extracted, {} already present, {} failed",
            self.stats.extracted(),
            self.stats.skipped_existing(),
            self.stats.failed()
        );
        Ok(())
    }
}

/// Join a `/`-separated relative path onto `output_dir` and append `suffix` to the file name.
/// Leading `/` and `..` components are dropped so outputs never escape `output_dir`.
pub fn output_path_for(output_dir: &Path, relative: &str, suffix: &str) -> PathBuf {
    let mut out = output_dir.to_path_buf();
    for part in relative.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        out.push(part);
    }
    let mut name = out.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    out.set_file_name(name);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_keeps_tree_and_appends_suffix() {
        let p = output_path_for(Path::new("/out"), "docs/a/report.pdf", ".txt");
        assert_eq!(p, PathBuf::from("/out/docs/a/report.pdf.txt"));
    }

    #[test]
    fn output_path_cannot_escape() {
        let p = output_path_for(Path::new("/out"), "../../etc/passwd", ".txt");
        assert_eq!(p, PathBuf::from("/out/etc/passwd.txt"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn shutdown_kills_hung_extractor_and_removes_output() {
        use std::sync::Arc;
        use std::time::Instant;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("extractor.pid");
        let out_dir = dir.path().join("out");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        let processor = Arc::new(
            CommandProcessor::new(CommandSettings {
                command: vec!["sh".into(), "-c".into(), script],
                output_dir: out_dir.clone(),
                output_suffix: ".txt".into(),
                overwrite: false,
            })
            .unwrap(),
        );
        let resource = FileResource::new("slow.pdf", dir.path().join("slow.pdf"));
        let output = processor.output_path(&resource);

        let worker = {
            let processor = Arc::clone(&processor);
            thread::spawn(move || processor.process(&resource))
        };
        let started = Instant::now();
        while !(pid_file.exists() && processor.running_extractors() == 1) {
            assert!(started.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(10));
        }
        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(output.exists());

        processor.shutdown().unwrap();
        assert!(worker.join().unwrap().is_err());
        assert_eq!(processor.running_extractors(), 0);
        assert!(!output.exists());
        assert!(!Path::new("/proc").join(&pid).exists());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(processor.stats().failed(), 1);
    }
}
