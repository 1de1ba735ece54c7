pub mod change_event;
pub mod connection;
pub mod error;
pub mod job;
pub mod page;
pub mod query;

pub use change_event::{ChangeEnvelope, ChangeEvent, ChangeKind, RowIdentity};
pub use connection::{ChannelSignal, ConnectionState, ConnectionStats, ConnectionStatus};
pub use error::{FeedError, FeedErrorKind, FeedResult};
pub use job::{DedupKey, JobRecord, JobRecordRaw, LocationTier};
pub use page::{Pagination, ResultPage};
pub use query::{DEFAULT_PAGE_SIZE, ExperienceLevel, QueryClass, SearchQuery, WorkSetting};
