//! Protocol-wide default values. Grounded on reliudp's `consts.rs`, which
//! picks `MAX_UDP_MESSAGE_SIZE` from an MTU budget; this crate keeps the same
//! reasoning for `DEFAULT_SPLIT_SIZE` instead of re-deriving it from scratch.

/// Default fragment body size. The common IPv6 MTU floor is 1280; after
/// accounting for IPv4/IPv6 + UDP headers (worst case ~68 bytes) and this
/// crate's own frame overhead, 448 leaves headroom without forcing a second
/// fragment for typical small control payloads.
pub(crate) const DEFAULT_SPLIT_SIZE: usize = 448;

/// Default number of consecutive barren `poll_outbound` calls on the
/// receiver before it forces completion or a retry.
pub(crate) const DEFAULT_EMPTY_SENDS_TILL_FORCED: u32 = 2;

/// Default number of seconds a stalled registry entry may sit idle before
/// the external marshal is expected to time it out.
pub(crate) const DEFAULT_MAXIMUM_FRAGMENT_AGE_SECS: u64 = 30;

/// Floor enforced by `FragmentationOptions::validate`.
pub(crate) const MINIMUM_MAXIMUM_FRAGMENT_AGE_SECS: u64 = 2;
