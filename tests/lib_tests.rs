use batchguard::engine::FileProcessor;
use batchguard::engine::selector::{FileSelector, Selector};
use batchguard::engine::tools::{
    glob_match, path_relative_to, path_to_id_string, should_include_in_walk,
};
use batchguard::pipeline::{
    BoundedQueue, CancelToken, Consumer, ConsumerSettings, Crawler, CrawlerSettings, vec_source,
};
use batchguard::{ConsumerState, FileResource, MetaKeys, Metadata, WorkItem};
use crossbeam_channel::bounded;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// --- path_relative_to ---

#[test]
fn test_path_relative_under_base() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/foo/bar/baz/qux");
    assert_eq!(
        path_relative_to(&path, &base),
        Some(PathBuf::from("baz/qux"))
    );
}

#[test]
fn test_path_relative_not_under_base() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/other/qux");
    assert_eq!(path_relative_to(&path, &base), None);
}

#[test]
fn test_path_to_id_string_normalizes_backslashes() {
    assert_eq!(
        path_to_id_string(&PathBuf::from("src\\main.rs")),
        "src/main.rs"
    );
}

// --- glob_match / should_include_in_walk ---

#[test]
fn test_glob_match_star() {
    assert!(glob_match("*.pdf", "report.pdf"));
    assert!(glob_match("*.pdf", ".pdf"));
    assert!(!glob_match("*.pdf", "report.pdf.txt"));
    assert!(glob_match("scan_*", "scan_0001.tif"));
}

#[test]
fn test_glob_match_question_mark() {
    assert!(glob_match("page?.png", "page1.png"));
    assert!(!glob_match("page?.png", "page12.png"));
}

#[test]
fn test_should_include_root_excluded() {
    let root = PathBuf::from("/foo");
    assert!(!should_include_in_walk(&root, &root, &None));
}

#[test]
fn test_should_include_output_dir_skipped() {
    let root = PathBuf::from("/foo");
    let out = PathBuf::from("/foo/batchguard-output");
    let inside = out.join("a.txt");
    assert!(!should_include_in_walk(&inside, &root, &Some(out)));
}

#[test]
fn test_should_include_os_clutter_skipped() {
    let root = PathBuf::from("/foo");
    assert!(!should_include_in_walk(
        &PathBuf::from("/foo/.DS_Store"),
        &root,
        &None
    ));
    assert!(should_include_in_walk(
        &PathBuf::from("/foo/bar/baz.txt"),
        &root,
        &None
    ));
}

// --- FileSelector ---

fn metadata(path: &str, size: u64) -> Metadata {
    let name = path.rsplit('/').next().unwrap_or(path);
    let mut m = Metadata::new();
    m.insert(MetaKeys::PATH.to_string(), path.to_string());
    m.insert(MetaKeys::NAME.to_string(), name.to_string());
    m.insert(MetaKeys::SIZE.to_string(), size.to_string());
    m
}

#[test]
fn test_selector_exclude_wins_over_include() {
    let sel = FileSelector {
        include: vec!["*.pdf".into()],
        exclude: vec!["drafts/*".into()],
        ..Default::default()
    };
    assert!(sel.select(&metadata("final/a.pdf", 10)));
    assert!(!sel.select(&metadata("drafts/b.pdf", 10)));
    assert!(!sel.select(&metadata("final/c.doc", 10)));
}

#[test]
fn test_selector_size_bounds() {
    let sel = FileSelector {
        min_size: Some(10),
        max_size: Some(100),
        ..Default::default()
    };
    assert!(!sel.select(&metadata("a", 9)));
    assert!(sel.select(&metadata("a", 10)));
    assert!(sel.select(&metadata("a", 100)));
    assert!(!sel.select(&metadata("a", 101)));
}

#[test]
fn test_closure_selector() {
    let sel = |m: &Metadata| m.get(MetaKeys::NAME).is_some_and(|n| n.starts_with('k'));
    assert!(sel.select(&metadata("x/keep.txt", 1)));
    assert!(!sel.select(&metadata("x/drop.txt", 1)));
}

// --- BoundedQueue ---

#[test]
fn test_queue_capacity_at_least_consumers() {
    assert_eq!(BoundedQueue::new(1, 3).capacity(), 3);
    assert_eq!(BoundedQueue::new(10, 3).capacity(), 10);
}

#[test]
fn test_queue_never_exceeds_capacity() {
    let q = BoundedQueue::new(2, 1);
    let wait = Duration::from_millis(5);
    assert!(q.try_push(WorkItem::Poison, wait).is_ok());
    assert!(q.try_push(WorkItem::Poison, wait).is_ok());
    let back = q.try_push(WorkItem::Resource(FileResource::new("x", "/x")), wait);
    assert!(matches!(back, Err(WorkItem::Resource(_))));
    assert_eq!(q.len(), 2);
    assert_eq!(q.try_pop(wait), Some(WorkItem::Poison));
    assert!(q.try_push(WorkItem::Poison, wait).is_ok());
    assert_eq!(q.len(), 2);
}

// --- Consumer ---

fn resources(n: usize) -> Vec<FileResource> {
    (0..n)
        .map(|i| FileResource::new(format!("f{i}"), format!("/data/f{i}")))
        .collect()
}

fn consumer_settings() -> ConsumerSettings {
    ConsumerSettings {
        poll_timeout: Duration::from_millis(10),
        max_consec_wait: Duration::from_secs(10),
    }
}

fn ok_processor() -> Arc<dyn FileProcessor> {
    Arc::new(|_: &FileResource| -> anyhow::Result<bool> { Ok(true) })
}

#[test]
fn test_terminal_state_is_never_overwritten() {
    let q = BoundedQueue::new(4, 1);
    let c = Consumer::new(0, q.clone(), ok_processor(), consumer_settings(), CancelToken::new());
    c.please_retire();
    q.try_push(WorkItem::Poison, Duration::from_millis(5)).unwrap();
    let result = c.run();
    assert_eq!(result.state, ConsumerState::Retired);
    assert_eq!(c.check_for_stale(Duration::ZERO).map(|m| m.resource_id), None);
    assert_eq!(c.state(), ConsumerState::Retired);
}

#[test]
fn test_consumer_times_out_on_empty_queue() {
    let q = BoundedQueue::new(4, 1);
    let settings = ConsumerSettings {
        poll_timeout: Duration::from_millis(10),
        max_consec_wait: Duration::from_millis(50),
    };
    let c = Consumer::new(0, q, ok_processor(), settings, CancelToken::new());
    assert_eq!(c.run().state, ConsumerState::TimedOutWaiting);
}

#[test]
fn test_consumer_interrupted_at_poll_point() {
    let q = BoundedQueue::new(4, 1);
    let interrupt = CancelToken::new();
    interrupt.cancel();
    let c = Consumer::new(0, q, ok_processor(), consumer_settings(), interrupt);
    assert_eq!(c.run().state, ConsumerState::ThreadInterrupted);
}

#[test]
fn test_stale_detected_exactly_once() {
    let (release_tx, release_rx) = bounded::<()>(0);
    let processor: Arc<dyn FileProcessor> = Arc::new(move |_: &FileResource| -> anyhow::Result<bool> {
        let _ = release_rx.recv_timeout(Duration::from_secs(30));
        Ok(true)
    });
    let q = BoundedQueue::new(4, 1);
    q.try_push(
        WorkItem::Resource(FileResource::new("slow.pdf", "/data/slow.pdf")),
        Duration::from_millis(5),
    )
    .unwrap();
    let c = Arc::new(Consumer::new(
        0,
        q,
        processor,
        consumer_settings(),
        CancelToken::new(),
    ));
    let runner = Arc::clone(&c);
    let handle = thread::spawn(move || runner.run());

    thread::sleep(Duration::from_millis(150));
    let marker = c.check_for_stale(Duration::from_millis(50));
    assert_eq!(marker.map(|m| m.resource_id).as_deref(), Some("slow.pdf"));
    assert!(c.check_for_stale(Duration::from_millis(50)).is_none());
    assert_eq!(c.state(), ConsumerState::Stale);

    drop(release_tx);
    let result = handle.join().unwrap();
    assert_eq!(result.state, ConsumerState::Stale);
}

#[test]
fn test_worker_error_keeps_in_flight_marker() {
    let processor: Arc<dyn FileProcessor> = Arc::new(|r: &FileResource| -> anyhow::Result<bool> {
        if r.id == "f2" {
            anyhow::bail!("corrupt file");
        }
        Ok(true)
    });
    let q = BoundedQueue::new(10, 1);
    for r in resources(5) {
        q.try_push(WorkItem::Resource(r), Duration::from_millis(5)).unwrap();
    }
    let c = Consumer::new(0, q, processor, consumer_settings(), CancelToken::new());
    let result = c.run();
    assert_eq!(result.state, ConsumerState::WorkerException);
    assert_eq!(result.processed, 2);
    assert_eq!(result.in_flight.map(|m| m.resource_id).as_deref(), Some("f2"));
    assert!(!result.failure.unwrap().no_restart);
}

#[test]
fn test_worker_panic_is_worker_error() {
    let processor: Arc<dyn FileProcessor> =
        Arc::new(|_: &FileResource| -> anyhow::Result<bool> { panic!("parser blew up") });
    let q = BoundedQueue::new(2, 1);
    q.try_push(
        WorkItem::Resource(FileResource::new("bad", "/bad")),
        Duration::from_millis(5),
    )
    .unwrap();
    let c = Consumer::new(0, q, processor, consumer_settings(), CancelToken::new());
    let result = c.run();
    assert_eq!(result.state, ConsumerState::WorkerError);
    assert!(result.failure.unwrap().message.contains("parser blew up"));
}

// --- Crawler ---

fn crawler_settings(num_consumers: usize) -> CrawlerSettings {
    CrawlerSettings {
        num_consumers,
        max_consec_wait: Duration::from_secs(5),
        offer_pulse: Duration::from_millis(5),
        max_files: None,
        strict: false,
    }
}

fn select_all() -> Arc<dyn Selector> {
    Arc::new(|_: &Metadata| true)
}

#[test]
fn test_poison_delivered_once_per_consumer() {
    let n = 3;
    let q = BoundedQueue::new(4, n);
    let consumers: Vec<Arc<Consumer>> = (0..n)
        .map(|id| {
            Arc::new(Consumer::new(
                id,
                q.clone(),
                ok_processor(),
                consumer_settings(),
                CancelToken::new(),
            ))
        })
        .collect();
    let handles: Vec<_> = consumers
        .iter()
        .map(|c| {
            let c = Arc::clone(c);
            thread::spawn(move || c.run())
        })
        .collect();

    let crawler = Crawler::new(
        q.clone(),
        select_all(),
        crawler_settings(n),
        CancelToken::new(),
        CancelToken::new(),
    );
    let result = crawler.run(vec_source(resources(20))).unwrap();
    assert_eq!(result.considered, 20);
    assert_eq!(result.added, 20);
    assert!(result.completed_crawling);
    assert!(!crawler.status().is_active());

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().all(|r| r.state == ConsumerState::SwallowedPoison));
    assert_eq!(results.iter().map(|r| r.processed).sum::<usize>(), 20);
    assert!(q.is_empty());
}

#[test]
fn test_crawler_counts_unselected_as_considered() {
    let q = BoundedQueue::new(100, 1);
    let even_only: Arc<dyn Selector> = Arc::new(|m: &Metadata| {
        m.get(MetaKeys::NAME)
            .and_then(|n| n.trim_start_matches('f').parse::<usize>().ok())
            .is_some_and(|i| i % 2 == 0)
    });
    let with_names: Vec<FileResource> = resources(10)
        .into_iter()
        .map(|r| {
            let name = r.id.clone();
            r.with_meta(MetaKeys::NAME, name)
        })
        .collect();
    let crawler = Crawler::new(
        q,
        even_only,
        crawler_settings(1),
        CancelToken::new(),
        CancelToken::new(),
    );
    let result = crawler.run(vec_source(with_names)).unwrap();
    assert_eq!(result.considered, 10);
    assert_eq!(result.added, 5);
}

#[test]
fn test_crawler_max_files_stops_without_timeout() {
    let q = BoundedQueue::new(100, 2);
    let settings = CrawlerSettings {
        max_files: Some(3),
        ..crawler_settings(2)
    };
    let crawler = Crawler::new(q.clone(), select_all(), settings, CancelToken::new(), CancelToken::new());
    let result = crawler.run(vec_source(resources(10))).unwrap();
    assert_eq!(result.added, 3);
    assert!(!result.timed_out);
    assert!(result.completed_crawling);
    // 3 items + 2 poison
    assert_eq!(q.len(), 5);
}

#[test]
fn test_crawler_times_out_on_full_queue() {
    let q = BoundedQueue::new(1, 1);
    let settings = CrawlerSettings {
        max_consec_wait: Duration::from_millis(50),
        ..crawler_settings(1)
    };
    let crawler = Crawler::new(q, select_all(), settings, CancelToken::new(), CancelToken::new());
    let result = crawler.run(vec_source(resources(3))).unwrap();
    assert!(result.timed_out);
    assert!(!result.completed_crawling);
    assert_eq!(result.added, 1);
    assert!(crawler.status().was_timed_out());
}

#[test]
fn test_shutdown_queue_is_idempotent() {
    let q = BoundedQueue::new(4, 2);
    let crawler = Crawler::new(
        q.clone(),
        select_all(),
        crawler_settings(2),
        CancelToken::new(),
        CancelToken::new(),
    );
    crawler.shutdown_queue().unwrap();
    crawler.shutdown_queue().unwrap();
    assert_eq!(q.len(), 2);
}
