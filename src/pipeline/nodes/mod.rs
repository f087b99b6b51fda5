//! Built-in pipeline stages.

pub mod band_filter;
pub mod broadcast;
pub mod channel_screen;
pub mod envelope;
pub mod recorder;
pub mod replay_source;

pub use band_filter::BandFilter;
pub use broadcast::{BroadcastOutput, SinkEvent};
pub use channel_screen::ChannelScreen;
pub use envelope::{EnvelopeFollower, SUPPORTED_METHODS};
pub use recorder::SegmentRecorder;
pub use replay_source::ReplaySource;
