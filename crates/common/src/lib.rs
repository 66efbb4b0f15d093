// shelf-common: shared types for the offline queue and its sync service.

pub mod action;
pub mod change;
pub mod events;
pub mod types;
