pub mod date_filter;
pub mod download_capture;
pub mod file_store;
pub mod history;
pub mod pagination;
pub mod row_classifier;

pub use date_filter::{DateFilterResolver, FilterOutcome, FilterStrategy};
pub use download_capture::{CaptureChannel, CapturedFile, DownloadCapture};
pub use history::{HistorySink, MemoryHistory, SqliteHistory};
pub use pagination::{PageAdvance, PageSignature, PaginationWalker};
pub use row_classifier::{classify_row, resolve_status_column, RowClassification};
