//! Vigil - maintenance window engine and item value preprocessing.

pub mod cache;
pub mod config;
pub mod maintenance;
pub mod preproc;
pub mod timer;
