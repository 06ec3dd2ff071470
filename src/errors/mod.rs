pub mod types;

pub use types::{ErrorPayload, HoundError};
