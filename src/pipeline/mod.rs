//! Pipeline components: queue, crawler, consumers, helper tasks and the supervisor that runs them.

pub mod consumer;
pub mod context;
pub mod crawler;
pub mod interrupter;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod reporter;
pub mod signal;
pub mod walk;

pub use consumer::{Consumer, ConsumerSettings};
pub use context::{BatchPlugins, RunContext, RunTasks};
pub use crawler::{Admission, Crawler, CrawlerSettings, CrawlerStatus};
pub use interrupter::{Interrupter, interrupt_channel, watch_stdin};
pub use monitor::{MonitorSettings, TimeoutMonitor};
pub use orchestrator::run_batch;
pub use pool::{TaskCompletion, TaskFailure, TaskPool};
pub use queue::BoundedQueue;
pub use reporter::StatusReporter;
pub use signal::CancelToken;
pub use walk::{
    CrawlIter, CrawlOutcome, CrawlSource, WalkContext, directory_source, list_source,
    listed_outcome, resource_from_path, vec_source,
};
