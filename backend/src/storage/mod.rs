pub mod identity;
pub mod upload_store;
