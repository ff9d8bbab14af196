//! Ingests AWS Cost & Usage Report exports from S3 into a local DuckDB
//! database, or prints samples of them in preview mode.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ingest_job;
