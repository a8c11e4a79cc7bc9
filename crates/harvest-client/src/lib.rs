pub mod config;
pub mod content_store;

pub use config::ContentStoreConfig;
pub use content_store::HttpContentStore;
