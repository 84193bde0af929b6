pub mod aggregator;
pub mod facade;
pub mod operation;

pub use aggregator::{PackageAggregator, SEARCH_DEBOUNCE, sort_packages};
pub use facade::{PackageManager, SOURCE_LIST_TIMEOUT};
pub use operation::{MAX_AUTO_RETRIES, OperationReport, OperationRunner};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
