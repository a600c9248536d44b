// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

pub mod anonymiser;
pub mod config;
pub mod database;
pub mod dumper;
pub mod error;
pub mod json_schema;
pub mod pipeline;
pub mod reader;
pub mod subset;

pub use error::{Error, Result};
