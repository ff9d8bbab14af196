pub mod archive;
pub mod aws_auth;
pub mod duckdb;
pub mod in_mem_store;
pub mod parsers;
pub mod s3_adapter;
