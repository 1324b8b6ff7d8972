pub mod builder;
pub mod constants;
pub mod options;
pub(crate) mod reaper;
pub(crate) mod rt_impl;
pub mod types;

mod core;
pub use builder::RuntimeBuilder;
pub use core::SandpitRuntime;
