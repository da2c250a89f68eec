//! Process-level orchestration: configuration, worker jobs, scheduling and
//! output merging.

pub mod config;
pub mod merge;
pub mod scheduler;
pub mod worker;

pub use config::{cache_dir_for, load_sample_file, write_sample_file, BaseTypeRunnerConfig, ConfigError};
pub use merge::{merge_files, MergeError, MergeStrategy, MergeSummary, OutputMerger};
pub use scheduler::{
    partition_regions, BaseTypeRunner, RunSummary, SchedulerError, WorkerPool, POLL_INTERVAL,
};
pub use worker::{
    batch_header, batch_path, call_region, chromosome_shares, encode_region, run_worker,
    ChromosomeShare, EncodeSettings, WorkerArgs, WorkerError, WorkerSummary,
};
