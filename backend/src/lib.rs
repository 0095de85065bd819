pub mod config;
pub mod inference;
pub mod ledger;
pub mod pipeline;
pub mod routes;
pub mod storage;
