// Copyright 2026 Oxide Computer Company

//! The ambient observability stack: structured logging via `slog` and
//! DTrace-style USDT probes via `usdt`, carried over unchanged from the
//! crate's dependency set. Call sites live at the classify/insert/
//! delete/reconstruct boundaries in [`crate::combined`].

use slog::{o, Drain};

/// Build a terminal-backed, asynchronous root logger honoring
/// `RUST_LOG` (via `slog-envlogger`). Cheap to clone: `slog::Logger` is
/// `Arc`-backed internally.
pub fn root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!("component" => "combined-classifier"))
}

/// USDT probes for the classifier's hot paths. `#[usdt::provider]`
/// turns each stub function below into a macro of the same name
/// (`classify_hit!`, `classify_miss!`, `rule_insert!`, `rule_delete!`,
/// `tree_created!`, `tree_accept!`), each taking a closure that is only
/// evaluated if the probe is actually enabled.
#[usdt::provider]
pub mod probes {
    fn classify_hit(_rule_id: u64, _priority: i64) {}
    fn classify_miss() {}
    fn rule_insert(_rule_id: u64, _contiguous: u8) {}
    fn rule_delete(_rule_id: u64) {}
    fn tree_created(_tree_idx: u64) {}
    fn tree_accept(_tree_idx: u64, _num_rules: u64) {}
}

/// Register the probes with the kernel DTrace/USDT framework. A no-op
/// everywhere the underlying platform support is absent; call once at
/// process startup before relying on probe output.
pub fn register_probes() -> Result<(), usdt::Error> {
    usdt::register_probes()
}
