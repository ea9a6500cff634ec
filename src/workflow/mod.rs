pub mod authenticator;
pub mod job_director;
pub mod run_ctx;

pub use authenticator::{capture_debug_snapshot, Authenticator};
pub use job_director::{select_link, JobDirector, JobState, RunReport};
pub use run_ctx::RunContext;
