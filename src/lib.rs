pub mod config;
pub mod db;
pub mod ingest;
pub mod kafka;
pub mod models;
pub mod parser;
pub mod processor;
pub mod queue;
pub mod statistics;
pub mod storage;
pub mod upload;
