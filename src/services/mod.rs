pub mod file_service;
pub mod listing_cache;
#[cfg(test)]
pub mod memory_store;
pub mod storage_service;
pub mod thumbnail;
