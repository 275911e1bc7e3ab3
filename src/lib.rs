pub mod cli;
pub mod config;
pub mod error;
pub mod services;
pub mod store;
pub mod time;

#[cfg(test)]
pub mod test_support;
