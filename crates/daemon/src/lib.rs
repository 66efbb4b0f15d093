// shelf-daemon library entry point: offline queue, sync engine and the task
// runner that serializes all work against the local database.

pub mod config;
pub mod events;
pub mod queue;
pub mod remote;
pub mod runner;
pub mod runtime;
pub mod security;
pub mod service;
pub mod store;
pub mod sync;
