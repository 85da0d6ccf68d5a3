//! Ingestion of exchange oil-product trading bulletins.
//!
//! Report links are crawled from a paginated listing, each report is
//! downloaded to scratch storage, parsed from its spreadsheet and persisted to
//! Postgres as one independent unit of work.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod service;
