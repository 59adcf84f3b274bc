//! HTTP clients

pub mod client;
