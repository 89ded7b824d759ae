//! # ladle-init Core Library
//!
//! This crate contains the core logic of `ladle-init` – the bootstrap installer
//! for the `ladle` package manager.
//!
//! `ladle-init` provisions a private, relocatable `ladle` installation (program
//! files, launcher shims, configuration, and the main package bucket) without
//! requiring elevated privileges, and makes `ladle` invocable from a shell
//! right after the run finishes.
//!
//! This library is built for the `ladle-init` CLI, but you can also embed it to
//! drive installs from another tool; every host capability (network gateway,
//! durable search-path store, environment-change notifier) sits behind a trait.
//!
//! ## Modules Overview
//! - [`layout`] – Deriving the installation directory layout from one root
//! - [`transport`] – Acquiring the tool sources (git clone with archive-fetch fallback)
//! - [`extract`] – Staged archive extraction under file-lock contention
//! - [`shims`] – Multi-shell launcher shims for the installed entry point
//! - [`registrar`] – Durable command-search-path registration
//! - [`config`] – The persisted configuration document
//! - [`installer`] – The orchestration pipeline
//! - [`util`] – Shared utilities (directory setup, mirror copy)

pub mod config;
pub mod extract;
pub mod installer;
pub mod layout;
pub mod registrar;
pub mod shims;
pub mod transport;
pub mod util;

pub use config::*;
pub use extract::*;
pub use installer::*;
pub use layout::*;
pub use registrar::*;
pub use shims::*;
pub use transport::*;
pub use util::*;
