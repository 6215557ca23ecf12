//! Fragmentation engines: splitting a message into
//! `FragmentMessage` packets on the way out and reassembling them into a
//! single buffer on the way in, each side driven by `poll_outbound`/`ingest`
//! rather than owning a socket itself.

pub mod options;
pub mod receiver;
pub mod sender;

pub use options::FragmentationOptions;
pub use receiver::FragmentReceiver;
pub use sender::FragmentSender;
