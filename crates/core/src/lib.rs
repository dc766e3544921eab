pub mod analysis;
pub mod config;
pub mod errors;

pub use analysis::{
    AnalysisError, AnalysisReport, AnalysisRequest, AnalysisService, CommandArgument,
    UnconfiguredAnalysisService,
};
pub use errors::{ApplicationError, InterfaceError};
