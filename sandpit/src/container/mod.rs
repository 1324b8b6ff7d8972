//! Container records and their lifecycle.
//!
//! - `state`: status enum and validated state machine
//! - `config`: immutable per-container configuration
//! - `container_impl`: the registry record (state, filesystem, live runtime)
//! - `gate`: per-container FIFO operation admission
//! - `lifecycle`: runtime construction and teardown

mod config;
mod container_impl;
pub(crate) mod gate;
pub(crate) mod lifecycle;
mod state;

pub use config::ContainerConfig;
pub use state::{ContainerState, ContainerStatus};

pub(crate) use container_impl::{ContainerImpl, SharedContainerImpl};
