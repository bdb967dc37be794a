//! Media ingestion and sync pipeline
//!
//! Files from a cloud drive or the local filesystem are deduplicated,
//! fanned out with bounded concurrency, enriched with metadata and persisted
//! one transaction per item. Locally captured media goes back to the drive
//! through the network-gated [`uploader`].

pub mod capture_time;
pub mod catalog;
pub mod database;
pub mod dedup;
pub mod drive;
pub mod error;
pub mod executor;
pub mod geocoder;
pub mod importer;
pub mod metadata_extractor;
pub mod models;
pub mod network;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod thumbnail_generator;
pub mod tools;
pub mod uploader;
