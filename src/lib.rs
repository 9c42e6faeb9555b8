use std::time::Duration;

pub mod assembler;
pub mod cli;
pub mod downloader;
pub mod error;
pub mod models;
pub mod net;
pub mod planner;
pub mod progress;
pub mod url_ref;
pub mod utils;
pub mod wire;
pub mod worker;

pub use error::{Error, Result};

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024; // 64 KB per socket read
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024; // 16 MB, allocated once per connection
pub const BYTES_PER_CONNECTION: u64 = 128 * 1024; // 128 KB per automatic connection
pub const AUTO_CONNECTION_CAP: usize = 16;
pub const MANUAL_CONNECTION_CAP: usize = 32;
pub const MAX_REDIRECTS: usize = 5;
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
pub const COPY_BUFFER_SIZE: usize = 256 * 1024;
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
pub const SPEED_SAMPLES: usize = 10;
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const USER_AGENT: &str = concat!("fetchline/", env!("CARGO_PKG_VERSION"));
