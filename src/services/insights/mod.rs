pub mod batch;
pub mod context;
pub mod due;
pub mod period;
pub mod rank;
pub mod season;
pub mod significance;
pub mod summary;
pub mod template;
pub mod window;

pub use batch::{evaluate_template, run_batch, BatchOptions, InsightReport, ReportStatus};
pub use context::{ComparisonContext, ComparisonContextBuilder, WindowComparison, WindowOutcome};
pub use period::{resolve_period, PeriodOfInterest, ReferencePeriod};
pub use season::SeasonMapping;
pub use significance::{evaluate, SignificanceConfig, SignificanceVerdict};
pub use template::InsightTemplate;
pub use window::{WindowKind, WindowSpec};
