pub mod correlator;
pub mod error;
pub mod messages;
pub mod mock_host;
pub mod transport;

pub use correlator::{Correlator, Lifecycle, Predicate, Unsubscribe, WaiterId};
pub use error::{ClientError, TransportError};
pub use messages::{DebugToolsApi, DebugToolsMessages};
pub use transport::{
    ChannelHostSink, HostSink, InboundHandle, ResponseNarrowing, Subscription, Transport,
    TransportOptions,
};
