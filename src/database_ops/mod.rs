pub mod assets;
pub mod dedup;
pub mod destiny;
pub mod drift;
pub mod fetch;
pub mod halo5;
pub mod identity;
pub mod memory_store;
pub mod pg_store;
pub mod store;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;
