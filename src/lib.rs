mod api;
pub mod args;
pub mod commands;
mod config;
mod db;
mod error;
mod period;
pub mod reshape;
mod utils;
pub mod workbook;


pub use config::{Config, Job, LibrarySettings, SheetTarget};
pub use db::{DriftPolicy, WriteMode};
pub use error::{Error, MalformedHeader, Result, SchemaMismatch};
pub use period::Period;
