//! Turning probe outcomes into ranked, chunked list files plus a manifest.

mod aggregate;
mod manifest;
mod write;

pub use aggregate::{aggregate, annotate, AggregateOptions, Bucket, Candidate, Line};
pub use manifest::{Artifact, Manifest, MANIFEST_FILE};
pub use write::{chunk_name, write_buckets, PublishError};
