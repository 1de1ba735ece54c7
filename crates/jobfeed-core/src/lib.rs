pub mod backend;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod identity;
pub mod merge;
pub mod models;
pub mod projection;
pub mod seen;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use config::FeedConfig;
pub use session::{FeedSession, FeedView, Notice};
