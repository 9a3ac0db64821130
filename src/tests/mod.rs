//! End-to-end scenario coverage, one module per scenario, mirroring the
//! reference engine's `src/tests/week3_dayN.rs` layout but named for the
//! behavior under test rather than a course day.

mod basic_put_get;
mod hnsw_knn_sorted;
mod overwrite_and_compaction;
mod reopen_durability;
mod segment_compaction_visibility;

/// Routes this crate's `tracing::debug!`/`warn!` calls (rotation, flush,
/// compaction) through `tracing-subscriber` so `cargo test -- --nocapture`
/// shows them. Safe to call from every scenario test; only the first call
/// installs the subscriber.
pub(crate) fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
