pub mod booking;
pub mod config;
pub mod contacts;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod ports;
pub mod reminder;
pub mod store;
pub mod validate;
pub mod wal;
