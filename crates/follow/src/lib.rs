//! ```text
//! ┌──────────────┐  token   ┌──────────────┐  manifest url  ┌──────────────┐
//! │   reauth     ├──────────►    usher     ├────────────────►  poll (1s)   │
//! │  (every 5m)  │          │              │                │              │
//! └──────▲───────┘          └──────┬───────┘                └──────┬───────┘
//!        │   retry (10s)           │                               │ segment names
//!        └─────────────────────────┴───────────────────────────────┤
//!                                                                  │
//!                                    ┌─────────────────────────────▼───────┐
//!                                    │  download: in-flight + dedupe check │
//!                                    │        save {dir}/{bucket}/..       │
//!                                    └─────────────────────────────────────┘
//! ```
pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod session;
pub mod supervisor;
pub mod timed_set;
pub mod util;

pub use error::{FollowError, FollowResult};
pub use session::{SessionState, StreamSession};
pub use supervisor::SessionSupervisor;
pub use timed_set::TimedSet;
