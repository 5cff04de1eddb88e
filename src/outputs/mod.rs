//! File outputs written alongside the database.
//!
//! - [`dead_letter`]: JSONL records of articles that could not be persisted
//! - [`competitions`]: JSON competition index from the `competitions` command

pub mod competitions;
pub mod dead_letter;
