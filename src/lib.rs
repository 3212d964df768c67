pub mod api;
pub mod app;
pub mod auth;
pub mod commands;
pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod message;
pub mod poller;
pub mod scratch;
pub mod screen;
pub mod session;
pub mod upload;

#[cfg(test)]
mod testing;
