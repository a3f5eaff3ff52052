//! Bounded-concurrency transfer scheduling for release uploads.
//!
//! [`transfer`] holds the scheduler and its task model; [`store`] is the
//! executor that publishes files into a local release tree.

pub mod checksum;
pub mod config;
pub mod logging;
pub mod store;
pub mod transfer;
