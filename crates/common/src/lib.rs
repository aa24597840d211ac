//! Shared building blocks of the `meshctl` workspace: configuration,
//! logging setup, the command envelope protocol and hashing helpers.

pub mod config;
pub mod hash;
pub mod protocol;

#[cfg(feature = "logging")]
pub mod logging;
