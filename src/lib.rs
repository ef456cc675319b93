pub mod bot;
pub mod config;
pub mod core;
pub mod error;
pub mod exchange;
pub mod models;
pub mod notify;
pub mod state;
pub mod strategies;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
