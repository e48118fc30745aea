pub mod args;
pub mod card;
pub mod error;
