//! Russian-doll output caching with dependency versioning.
//!
//! The [`cache`] module is the library surface. [`config`], [`infra`] and
//! [`error`] back the `nestcache` maintenance binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
