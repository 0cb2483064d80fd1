pub mod batch;
pub mod cluster;
pub mod duplicates;
pub mod ingest;
pub mod prototype;
pub mod search;
pub mod settings;
pub mod store;
pub mod vector;
