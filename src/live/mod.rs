//! Client-side core of the live attendance dashboard.

mod feed;
mod poller;
#[cfg(feature = "cli")]
mod source;

pub use feed::{DEFAULT_CAPACITY, LiveFeed, Recency, initials, recorded_at, relative_time};
pub use poller::{
    DEFAULT_INTERVAL, FeedSource, MAX_BACKOFF, PollEvent, Poller, PollerConfig, PollerHandle,
    PollerState,
};
#[cfg(feature = "cli")]
pub use source::HttpFeedSource;
