//! Binario Kernel Library
//!
//! This library exposes kernel internals for integration testing.
//! The main entry point is the `binario` binary.

pub mod config;
pub mod db;
pub mod migration;
pub mod plugin;
