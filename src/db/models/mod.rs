pub mod session;
pub mod watcher;

pub use session::WatchSession;
pub use watcher::Watcher;
