pub mod config;
pub mod credential_store;
pub mod error;
pub mod local_store;
pub mod logging;
pub mod remote_http;
pub mod remote_store;
pub mod storage;
pub mod text_generation;
