pub mod backoff;
pub mod envelope;
pub mod filter;
pub mod replay;
pub mod store;
pub mod subscriber;

pub use envelope::{ChangeEnvelope, EntityKind, Operation, Record, RecordId};
pub use filter::FeedFilter;
pub use store::{ApplyOutcome, MirrorStore};
pub use subscriber::{
    ConnectionStatus, EnvelopeStream, FeedHandle, FeedSubscriber, FeedTransport, SharedStore,
};
