pub mod cert;
pub mod config;
pub mod error;
pub mod timer;
