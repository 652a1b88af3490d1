//! bqshift
//!
//! Export BigQuery routines, views, external tables, tables and scheduled
//! queries of one project to a Cloud Storage bucket, and import them into
//! another project.

pub mod app;
pub mod config;
pub mod gcp;
pub mod progress;
pub mod resource;
pub mod storage;
pub mod summary;
