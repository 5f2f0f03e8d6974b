//! Nimbus Core
//!
//! Core domain types, traits, and error handling for Nimbus.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the cache and the CLI.

pub mod asset;
pub mod config;
pub mod error;
pub mod ports;

pub use asset::{AssetType, Content, Publication, PublishOutcome, PutObject, Visibility};
pub use config::{
    CorruptIndexPolicy, DistributorConfig, DistributorSettings, LockPolicy, LockSettings,
    StaticCredentials,
};
pub use error::{Error, Result};
pub use ports::{LockProvider, LockToken, ObjectStore};
