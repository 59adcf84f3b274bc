pub mod error;
pub mod handlers;
pub mod ratelimit;
pub mod serve;
pub mod state;
