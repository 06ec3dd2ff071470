pub mod package;

pub use package::{
    EntryPoint, ExploitResult, PackageData, SinkType, SynthesisResult, TaskOutcome,
};
