pub mod account;
pub mod job;
pub mod loaders;
pub mod record;

pub use account::{Account, CertificateBundle, Credentials};
pub use job::{AccountRef, Category, DateRange, DocFormat, ExecutionMode, Job};
pub use loaders::{load_accounts, parse_accounts};
pub use record::{ExecutionRecord, RunStatus};
