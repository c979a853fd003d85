pub mod backend;
pub mod chunk_store;
pub mod identity;
pub mod merge_engine;
pub mod upload_locks;
pub mod upload_service;
