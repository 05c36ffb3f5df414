pub mod assistant;
pub mod chat;
pub mod common;
pub mod config;
pub mod console;
pub mod error;
pub mod network;
pub mod presence;
pub mod session;
pub mod storage;
pub mod time;

#[cfg(test)]
mod tests;
