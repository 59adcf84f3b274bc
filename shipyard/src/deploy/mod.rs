//! Deployment pipeline: state machine, engine and the pieces it drives

pub mod builder;
pub mod command;
pub mod engine;
pub mod fsm;
pub mod locks;
pub mod source;
pub mod supervisor;
