pub mod parser;
pub mod types;

pub use parser::{parse_config, validate};
pub use types::{AnalysisConfig, Bound};
