pub mod backend;
pub mod config;
pub mod email;
pub mod engine;
pub mod flow;
pub mod housekeeping;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payment;
pub mod pricing;
pub mod retry;
pub mod selection;
pub mod wal;
