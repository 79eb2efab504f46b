pub mod archive;
pub mod auth;
pub mod client;
pub mod config;
pub mod console;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod runtime;
pub mod status;
pub mod transform;
