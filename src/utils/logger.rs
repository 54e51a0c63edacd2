use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Which process is logging. The driver relays its child's stderr, so both end up interleaved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRole {
    Run,
    Driver,
}

impl LogRole {
    fn tag(self) -> &'static str {
        match self {
            LogRole::Run => "run",
            LogRole::Driver => "driver",
        }
    }
}

/// Install the env_logger backend. Dependencies log at warn; this crate at info, or debug when
/// `verbose`. `RUST_LOG` still applies on top. A second call is a no-op.
pub fn setup_logging(verbose: bool, role: LogRole) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(move |buf, record| {
            let name = format!("{}:{}", env!("CARGO_PKG_NAME"), role.tag());
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = if record.level() == Level::Warn {
                        "WARN".yellow()
                    } else {
                        "ERROR".red()
                    };
                    let target = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, target, record.args())
                }
                Level::Debug | Level::Trace => {
                    format!("[{} {}] {}", name.cyan(), "DEBUG".dimmed(), record.args())
                }
                Level::Info => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
