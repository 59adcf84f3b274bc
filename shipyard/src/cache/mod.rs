//! In-memory caches

pub mod subdomain;
