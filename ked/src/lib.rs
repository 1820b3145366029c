pub mod api;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod llm;
pub mod models;
pub mod services;
pub mod transcription;
