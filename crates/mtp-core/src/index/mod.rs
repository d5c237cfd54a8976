//! Live index + crawl scheduler (spec §4.8): a prioritized local catalog of
//! device object trees, updated by both bulk enumeration and device events.

mod object;
mod queue;
mod scheduler;
mod store;

pub use object::{build_path_key, IndexedObject};
pub use queue::{CrawlJob, CrawlPriority, CrawlQueue};
pub use scheduler::{ChangeNotification, CrawlScheduler, DEFAULT_INTER_FOLDER_YIELD, DEFAULT_PERIODIC_REFRESH};
pub use store::{InMemoryLiveIndex, LiveIndexStore, SqliteLiveIndex};
