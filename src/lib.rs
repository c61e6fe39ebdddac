//! Client for the MORB model-order-reduction benchmark repository.
//!
//! An example id is looked up in the cached index, its `.mat` payload is
//! loaded from the local cache or downloaded and hash-verified, and the named
//! matrices are classified into one of the known [`dataset::Dataset`] shapes.

pub mod app;
pub mod config;
pub mod dataset;
pub mod error;
pub mod example;
pub mod fs_util;
pub mod index;
pub mod integrity;
pub mod mat;
pub mod output;
pub mod remote;
pub mod size;
pub mod store;
pub mod toolkit;
