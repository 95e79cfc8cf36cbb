pub mod accounts;
pub mod automation;
pub mod bot;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod instructions;
pub mod notify;
pub mod round;
pub mod store;
pub mod utils;

pub use automation::*;
pub use bot::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use executor::*;
pub use store::*;
