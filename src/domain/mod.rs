pub mod error;
pub mod identifier;
pub mod models;
pub mod query;
pub mod settings;
pub mod value;
