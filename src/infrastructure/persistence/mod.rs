pub mod database;
pub mod orphan_journal;

pub use database::Database;
pub use orphan_journal::{OrphanSlJournal, OrphanSlRecord};
