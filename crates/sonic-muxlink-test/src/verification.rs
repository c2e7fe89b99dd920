//! Verification helpers for mux link manager tests
//!
//! Checks over the events recorded by [`SimSysfs`].

use std::path::PathBuf;

use thiserror::Error;

use crate::sim_sysfs::{SimSysfs, SysfsEvent};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Unexpected write of '{value}' to {}", path.display())]
    UnexpectedWrite { path: PathBuf, value: String },

    #[error("Write of '{value}' to {} started before the previous change completed", path.display())]
    OverlappingWrite { path: PathBuf, value: String },

    #[error("Expected {expected} link enumerations, got {actual}")]
    EnumerationCount { expected: usize, actual: usize },

    #[error("Link '{link}' is not present")]
    LinkMissing { link: String },

    #[error("Link '{link}' is still present")]
    LinkPresent { link: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Simulated sysfs verification helper
pub struct SysfsVerifier<'a> {
    sysfs: &'a SimSysfs,
}

impl<'a> SysfsVerifier<'a> {
    pub fn new(sysfs: &'a SimSysfs) -> Self {
        Self { sysfs }
    }

    /// Verify that neither control attribute was written
    pub fn assert_no_control_writes(&self) -> VerifyResult<()> {
        let add_mux = self.sysfs.add_mux_path();
        let del_mux = self.sysfs.del_mux_path();

        for recorded in self.sysfs.events() {
            if let SysfsEvent::Write { path, value } = recorded.event {
                if path == add_mux || path == del_mux {
                    return Err(VerificationError::UnexpectedWrite { path, value });
                }
            }
        }
        Ok(())
    }

    /// Verify that every control write was followed by the link change it
    /// caused before the next control write happened.
    ///
    /// Only meaningful when every operation succeeded.
    pub fn assert_serialized(&self) -> VerifyResult<()> {
        let mut in_flight = false;

        for recorded in self.sysfs.events() {
            match recorded.event {
                SysfsEvent::Write { path, value } => {
                    if in_flight {
                        return Err(VerificationError::OverlappingWrite { path, value });
                    }
                    in_flight = true;
                }
                SysfsEvent::LinkAdded { .. } | SysfsEvent::LinkRemoved { .. } => {
                    in_flight = false;
                }
            }
        }
        Ok(())
    }

    /// Verify the number of link enumerations so far
    pub fn assert_enumerations(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.sysfs.list_calls();
        if actual != expected {
            return Err(VerificationError::EnumerationCount { expected, actual });
        }
        Ok(())
    }

    /// Verify that a link is present
    pub fn assert_link_present(&self, link: &str) -> VerifyResult<()> {
        if !self.sysfs.links().iter().any(|l| l == link) {
            return Err(VerificationError::LinkMissing {
                link: link.to_string(),
            });
        }
        Ok(())
    }

    /// Verify that a link is gone
    pub fn assert_link_absent(&self, link: &str) -> VerifyResult<()> {
        if self.sysfs.links().iter().any(|l| l == link) {
            return Err(VerificationError::LinkPresent {
                link: link.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_muxlinkmgrd::AttributeIo;

    #[tokio::test]
    async fn test_overlapping_writes_detected() {
        let sim = SimSysfs::new("wwan0").with_add_reaction(crate::KernelReaction::Never);
        sim.write_attribute(&sim.add_mux_path(), "0x01").await.unwrap();
        sim.write_attribute(&sim.add_mux_path(), "0x02").await.unwrap();

        let verifier = SysfsVerifier::new(&sim);
        assert!(matches!(
            verifier.assert_serialized(),
            Err(VerificationError::OverlappingWrite { .. })
        ));
        assert!(verifier.assert_no_control_writes().is_err());
    }

    #[test]
    fn test_empty_tree() {
        let sim = SimSysfs::new("wwan0");
        let verifier = SysfsVerifier::new(&sim);
        verifier.assert_serialized().unwrap();
        verifier.assert_no_control_writes().unwrap();
        verifier.assert_enumerations(0).unwrap();
        verifier.assert_link_absent("qmimux0").unwrap();
    }
}
