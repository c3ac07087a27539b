//! Response streams: per-exchange sinks and the registry that finds them

mod registry;
mod sink;

pub use registry::{RegistrationPolicy, ResponseStreamRegistry};
pub use sink::{create_sink_channel, ChannelSink, CloseReason, ResponseSink, SinkMessage, SinkUpdate};
