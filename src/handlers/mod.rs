pub mod analysis;
pub mod report;

pub use analysis::AnalysisHandler;
