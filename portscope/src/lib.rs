//! portscope
//!
//! Building blocks for monitoring serial (and TCP) byte streams: ports that
//! feed per-channel buffers, a flush pipeline with stuck-source recovery and
//! repeat collapsing, case-insensitive word highlighting, bounded styled
//! output, archived session logs and a cancellable bulk log loader.

pub mod channel;
pub mod clock;
pub mod config;
pub mod highlight;
pub mod loader;
pub mod monitor;
pub mod port;
pub mod sink;

pub use channel::{Channel, ChannelError, ChannelState, Event};
pub use config::MonitorConfig;
pub use highlight::{HighlightIndex, HighlightRule};
pub use monitor::Monitor;
pub use sink::{OutputSink, SharedSink};
