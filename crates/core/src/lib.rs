pub mod error;
pub mod graph;
pub mod media;
pub mod pipeline;
pub mod relay;
pub mod session;
pub mod state;
pub mod testsrc;

pub use error::{Result, SessionError};
pub use graph::provider::ElementProvider;
pub use media::{MediaKind, PayloadDescriptor, RenderFrame, TransportPacket};
pub use relay::{OverflowPolicy, PushOutcome, RelayQueue, RelayStats};
pub use session::{
    Direction, MediaSession, ProducerConfig, ReceiverConfig, RelayId, RenderSurface,
    SessionConfig, SessionEvent, TransportSink,
};
pub use state::{PipelineState, PipelineStateMachine, RequestOutcome};
