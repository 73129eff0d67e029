//! An embedded feature toggle client.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that decides whether features are enabled, and which
//! [`Variant`] of a feature to hand out, for an [`EvaluationContext`] describing the current user,
//! session and environment. Evaluation is local and in-process: it reads an immutable [`Snapshot`]
//! of feature definitions and never blocks or does I/O.
//!
//! A [`PollerThread`] keeps the snapshot fresh by fetching definitions from the server in the
//! background, backing off when the server fails. Definitions are saved to a backup file after
//! every change and restored from it at startup when the server is unreachable. A bootstrap
//! document can seed definitions before the first fetch.
//!
//! Features are enabled by activation strategies. The built-in strategies (`default`,
//! `flexibleRollout`, `userWithId`, `remoteAddress`, `applicationHostname`, the gradual rollouts
//! and `gradualContextMatching`) are registered automatically; implement [`Strategy`] to add your
//! own. Strategies can be narrowed by constraints and shared [`Segment`]s, and a feature can
//! depend on the state of parent features. Features flagged with impression data report every
//! evaluation to [`Subscriber::on_impression`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Evaluation never fails: missing definitions, unknown strategies and malformed constraints all
//! resolve to "off", the caller's fallback, or the default variant. Errors are only returned while
//! configuring the client and from fetch cycles, where they indicate that developer's attention is
//! needed (e.g., a wrong API key) and are also reported to the configured [`Subscriber`].
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, with
//! target `flagkit`. Consider integrating a `log`-compatible logger implementation for better
//! visibility into fetching and evaluation.
//!
//! # Examples
//!
//! A runnable example lives in `demos/simple`.

#![warn(rustdoc::missing_crate_level_docs)]

mod backup;
mod bootstrap;
mod bucketing;
mod client;
mod config;
mod constraints;
mod context;
mod error;
mod eval;
mod events;
mod fetcher;
mod metrics;
mod models;
mod poller;
mod snapshot;
mod snapshot_store;
mod strategy;
mod synchronizer;
mod throttler;
mod variant;

pub use backup::{BackupStore, FileBackupStore};
pub use bootstrap::{
    BootstrapSource, FileBootstrapSource, StaticBootstrapSource, BOOTSTRAP_FILE_ENV,
};
pub use bucketing::{
    is_within_percentage, normalized_number, normalized_number_with_seed,
    VARIANT_NORMALIZATION_SEED,
};
pub use client::Client;
pub use config::ClientConfig;
pub use constraints::constraints_all_match;
pub use context::{EvaluationContext, EvaluationContextBuilder};
pub use error::{Error, Result};
pub use eval::{Evaluation, Evaluator};
pub use events::{ImpressionEvent, LoggingSubscriber, Subscriber};
pub use fetcher::{FetchResponse, Fetcher, HttpFetcher, HttpFetcherConfig};
pub use metrics::MetricsSink;
pub use models::{
    Constraint, FeatureCollection, FeatureDefinition, FeatureDependency, Operator, Payload,
    Segment, StrategyConfig, TryParse, Variant, VariantDefinition, VariantOverride,
};
pub use poller::PollerThread;
pub use snapshot::{FetchStatus, Snapshot};
pub use snapshot_store::SnapshotStore;
pub use strategy::{
    ApplicationHostnameStrategy, DefaultStrategy, FlexibleRolloutStrategy,
    GradualContextMatchingStrategy, GradualRolloutRandomStrategy, GradualRolloutSessionIdStrategy,
    GradualRolloutUserIdStrategy, RandomGenerator, RemoteAddressStrategy, Strategy,
    StrategyRegistry, UnknownStrategy, UserWithIdStrategy,
};
pub use synchronizer::{load_initial_snapshot, Synchronizer};
pub use throttler::Throttler;
pub use variant::VariantHashing;
