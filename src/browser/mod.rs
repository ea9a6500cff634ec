pub mod launch;

pub use launch::{launch_browser, ChromeSessionFactory, LaunchOptions};
