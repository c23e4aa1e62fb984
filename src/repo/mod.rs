pub mod history;

pub use history::{HistoryError, HistoryStore};
