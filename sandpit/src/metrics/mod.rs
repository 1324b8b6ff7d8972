//! Metrics collection for the sandpit runtime.
//!
//! Two levels, mirroring Tokio's runtime/task split:
//! - **RuntimeMetrics**: aggregate counters across all containers plus live
//!   gauges sampled from the registry.
//! - **ContainerMetrics**: per-container counters, exposed on `ContainerInfo`.
//!
//! All counters are monotonic (never decrease). Delta calculation is the
//! caller's responsibility.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(runtime: sandpit::SandpitRuntime) {
//! let metrics = runtime.metrics();
//! println!("created: {}", metrics.containers_created_total());
//! println!("live: {}", metrics.num_live_containers());
//! # }
//! ```

mod container_metrics;
mod runtime_metrics;

pub use container_metrics::{ContainerMetrics, ContainerMetricsStorage};
pub use runtime_metrics::{LiveGauges, RuntimeMetrics, RuntimeMetricsStorage};
