pub mod assets;
pub mod config;
pub mod http;
pub mod humanize;
pub mod ledger;
pub mod migration;
pub mod observability;
pub mod persist;
pub mod snapshot;
