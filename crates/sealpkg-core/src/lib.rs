//! Core domain types for the sealpkg package format.
#![deny(warnings, clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

pub mod spec;
pub mod types;
