//! JSON file storage

mod store;
mod tasks;

pub use store::JsonStore;
pub use tasks::JsonTaskStore;
