//! Core data models.
//!
//! `File` is the domain entity handed to API callers; `Bucket` and
//! `ObjectRecord` are the rows the local object store keeps in SQLite.

pub mod bucket;
pub mod file;
pub mod object;
