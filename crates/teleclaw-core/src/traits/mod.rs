//! Traits implemented by TeleClaw's external collaborators.

pub mod access;
pub mod clock;
pub mod render;
pub mod status;
pub mod store;
pub mod transport;

pub use access::{AccessRequest, AccessResolver};
pub use clock::{Clock, FixedClock, SystemClock};
pub use render::ContentRenderer;
pub use status::StatusSink;
pub use store::RecordStore;
pub use transport::{
    ActionTransport, CommentRequest, Delivery, InboundMessage, MessageSender, PostRequest,
    TransportError, TransportErrorCode,
};
