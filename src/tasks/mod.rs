pub mod ingest;
pub mod poll;
pub mod push;
