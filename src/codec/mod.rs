pub mod primitives;
pub mod tag;

pub use tag::{tags, ProtocolTag};
