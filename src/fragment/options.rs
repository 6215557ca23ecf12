//! Fragmentation options bundle (§4.7): the tunables `FragmentSender` and
//! `FragmentReceiver` are constructed or re-armed with.
//!
//! Grounded on reliudp's `consts.rs` + `MessagePriority::resend_delay`
//! pattern of keeping knobs as small, validated plain-data structs rather
//! than scattering constants through the engine.

use crate::consts::{
    DEFAULT_EMPTY_SENDS_TILL_FORCED, DEFAULT_MAXIMUM_FRAGMENT_AGE_SECS, DEFAULT_SPLIT_SIZE,
    MINIMUM_MAXIMUM_FRAGMENT_AGE_SECS,
};
use crate::error::{ConfigError, ConfigResult};

/// Tunable knobs shared by `FragmentSender::setup` and
/// `FragmentReceiver::setup`. Validated as a unit via [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentationOptions {
    pub maximum_fragment_age_secs: u64,
    pub fragmentation_split_size: usize,
    pub empty_sends_till_forced: u32,
    pub verify_fragments: bool,
    pub equality_verify_fragments: bool,
}

impl Default for FragmentationOptions {
    fn default() -> Self {
        FragmentationOptions {
            maximum_fragment_age_secs: DEFAULT_MAXIMUM_FRAGMENT_AGE_SECS,
            fragmentation_split_size: DEFAULT_SPLIT_SIZE,
            empty_sends_till_forced: DEFAULT_EMPTY_SENDS_TILL_FORCED,
            verify_fragments: false,
            equality_verify_fragments: false,
        }
    }
}

impl FragmentationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_maximum_fragment_age_secs(mut self, secs: u64) -> Self {
        self.maximum_fragment_age_secs = secs;
        self
    }

    pub fn with_fragmentation_split_size(mut self, size: usize) -> Self {
        self.fragmentation_split_size = size;
        self
    }

    pub fn with_empty_sends_till_forced(mut self, n: u32) -> Self {
        self.empty_sends_till_forced = n;
        self
    }

    pub fn with_verify_fragments(mut self, value: bool) -> Self {
        self.verify_fragments = value;
        self
    }

    pub fn with_equality_verify_fragments(mut self, value: bool) -> Self {
        self.equality_verify_fragments = value;
        self
    }

    /// Rejects a bundle whose values would make the engines misbehave:
    /// an age floor below `MINIMUM_MAXIMUM_FRAGMENT_AGE_SECS`, a zero split
    /// size, a zero forced-completion counter, or equality verification
    /// requested without its prerequisite.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.maximum_fragment_age_secs < MINIMUM_MAXIMUM_FRAGMENT_AGE_SECS {
            return Err(ConfigError::MaximumFragmentAgeTooSmall(self.maximum_fragment_age_secs));
        }
        if self.fragmentation_split_size < 1 {
            return Err(ConfigError::SplitSizeTooSmall(self.fragmentation_split_size));
        }
        if self.empty_sends_till_forced < 1 {
            return Err(ConfigError::EmptySendsTillForcedTooSmall(self.empty_sends_till_forced));
        }
        if self.equality_verify_fragments && !self.verify_fragments {
            return Err(ConfigError::EqualityVerifyRequiresVerify);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FragmentationOptions::default().validate().is_ok());
    }

    #[test]
    fn age_floor_is_enforced() {
        let opts = FragmentationOptions::new().with_maximum_fragment_age_secs(1);
        assert_eq!(opts.validate(), Err(ConfigError::MaximumFragmentAgeTooSmall(1)));
    }

    #[test]
    fn zero_split_size_is_rejected() {
        let opts = FragmentationOptions::new().with_fragmentation_split_size(0);
        assert_eq!(opts.validate(), Err(ConfigError::SplitSizeTooSmall(0)));
    }

    #[test]
    fn zero_empty_sends_till_forced_is_rejected() {
        let opts = FragmentationOptions::new().with_empty_sends_till_forced(0);
        assert_eq!(opts.validate(), Err(ConfigError::EmptySendsTillForcedTooSmall(0)));
    }

    #[test]
    fn equality_verify_requires_verify_fragments() {
        let opts = FragmentationOptions::new().with_equality_verify_fragments(true);
        assert_eq!(opts.validate(), Err(ConfigError::EqualityVerifyRequiresVerify));

        let opts = opts.with_verify_fragments(true);
        assert!(opts.validate().is_ok());
    }
}
