pub mod account;
pub mod engine;
pub mod error;
pub mod mandate;
pub mod movement;
pub mod notify;
pub mod revocation;
pub mod scheduler;

pub use error::Error;
