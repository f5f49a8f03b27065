// Database module
// Vector records live in SQLite; embeddings are stored alongside their content

pub mod sqlite;

pub use sqlite::*;
