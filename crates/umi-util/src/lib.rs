#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for umi.
//!
//! Pure helpers with no logging dependencies. Logging is set up by the CLI.

pub mod fs;
pub mod hash;
