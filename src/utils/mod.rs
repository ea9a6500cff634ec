pub mod logging;
pub mod text;

pub use logging::RunLog;
pub use text::{normalize_signal, truncate_text};
