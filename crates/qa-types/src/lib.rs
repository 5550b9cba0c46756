pub mod configuration;
pub mod errors;

pub use configuration::*;
pub use errors::*;
