// Scripted autonomous runtime for a wheeled robot

pub mod auton;
pub mod config;
pub mod messages;
pub mod runtime;
pub mod store;
