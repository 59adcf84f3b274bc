//! Domain models

pub mod deployment;
pub mod manifest;
pub mod provider;
pub mod repository;
pub mod webhook;
