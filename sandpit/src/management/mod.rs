//! Container registry.
//!
//! [`ContainerManager`] owns the table of live container records. A record
//! is inserted at spawn (before its runtime exists) and removed when
//! teardown completes or construction fails.

mod manager;

pub(crate) use manager::ContainerManager;
