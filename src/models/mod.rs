//! Core data models for the chunked upload service.
//!
//! Chunk sets are derived from storage on demand, so the only persisted
//! entity worth modelling is the merged artifact.

pub mod upload;
