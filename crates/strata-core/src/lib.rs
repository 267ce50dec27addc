//! Core types and configuration for strata.
//!
//! This crate defines the `strata.toml` schema ([`StrataConfig`]), base image
//! references ([`ImageRef`]), timezone identifiers ([`TimezoneId`]), and the
//! shared error type.

pub mod config;
pub mod error;
pub mod image_ref;
pub mod timezone;

pub use config::{
    BaseImageConfig, ContextConfig, DependencyConfig, EntrypointConfig, RuntimeConfig,
    StoreConfig, StrataConfig, SystemConfig,
};
pub use error::{Error, Result};
pub use image_ref::ImageRef;
pub use timezone::TimezoneId;
