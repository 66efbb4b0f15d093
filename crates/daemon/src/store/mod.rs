// Persistence: one SQLite database for local entities and the offline queue.

pub mod annotations;
pub mod articles;
pub mod db;
