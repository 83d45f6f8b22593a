//! Object sources feeding the reconciliation driver.

pub mod file;

pub use file::FileSource;
