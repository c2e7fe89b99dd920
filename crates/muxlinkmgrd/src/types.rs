//! Type definitions for muxlinkmgrd

use std::fmt;
use std::str::FromStr;

use crate::error::{MuxLinkError, MuxLinkResult};

/// Lowest mux id the driver accepts.
pub const MUX_ID_MIN: u32 = 1;

/// Highest mux id the driver accepts.
pub const MUX_ID_MAX: u32 = 254;

/// Multiplex identifier of a virtual link, always within
/// [`MUX_ID_MIN`]..=[`MUX_ID_MAX`].
///
/// Exchanged with the control attributes as `0x%02x` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MuxId(u8);

impl MuxId {
    /// The lowest valid mux id.
    pub const MIN: MuxId = MuxId(MUX_ID_MIN as u8);

    /// The highest valid mux id.
    pub const MAX: MuxId = MuxId(MUX_ID_MAX as u8);

    /// Creates a mux id, rejecting values outside the valid range.
    pub fn new(value: u32) -> MuxLinkResult<Self> {
        if (MUX_ID_MIN..=MUX_ID_MAX).contains(&value) {
            Ok(MuxId(value as u8))
        } else {
            Err(MuxLinkError::invalid_args(format!(
                "Mux id {} out of range ({}-{})",
                value, MUX_ID_MIN, MUX_ID_MAX
            )))
        }
    }

    /// Parses the hex text found in sysfs (`0x05`, `05`, `0x5\n`).
    ///
    /// Zero, out-of-range and non-hex values are rejected as `Failed`,
    /// since they come from the kernel or the tracking table, not from the
    /// caller.
    pub fn parse_hex(text: &str) -> MuxLinkResult<Self> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        u32::from_str_radix(digits, 16)
            .ok()
            .filter(|v| (MUX_ID_MIN..=MUX_ID_MAX).contains(v))
            .map(|v| MuxId(v as u8))
            .ok_or_else(|| MuxLinkError::failed(format!("Couldn't parse mux id '{}'", trimmed)))
    }

    /// Returns the numeric value.
    pub fn value(&self) -> u32 {
        u32::from(self.0)
    }

    /// Returns the text written to the add/del control attributes.
    pub fn to_sysfs(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MuxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Mux id requested for a new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuxIdRequest {
    /// Let the manager pick the lowest free id.
    #[default]
    Automatic,
    /// Use exactly this id.
    Fixed(MuxId),
}

impl MuxIdRequest {
    /// Returns the fixed id, if any.
    pub fn fixed(&self) -> Option<MuxId> {
        match self {
            MuxIdRequest::Automatic => None,
            MuxIdRequest::Fixed(id) => Some(*id),
        }
    }
}

impl From<MuxId> for MuxIdRequest {
    fn from(id: MuxId) -> Self {
        MuxIdRequest::Fixed(id)
    }
}

impl FromStr for MuxId {
    type Err = MuxLinkError;

    /// Parses operator input: decimal (`5`) or hex (`0x05`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse::<u32>(),
        }
        .map_err(|_| MuxLinkError::invalid_args(format!("Invalid mux id '{}'", s)))?;

        MuxId::new(value)
    }
}

impl FromStr for MuxIdRequest {
    type Err = MuxLinkError;

    /// Parses operator input: `auto` or a [`MuxId`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(MuxIdRequest::Automatic);
        }
        s.parse::<MuxId>().map(MuxIdRequest::Fixed)
    }
}

/// A link created by an add operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedLink {
    /// Name of the new network interface.
    pub iface: String,
    /// Mux id the link was created with.
    pub mux_id: MuxId,
}

/// A link as seen in sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Network interface name.
    pub name: String,
    /// Mux id reported by the kernel, if the driver exposes it.
    pub mux_id: Option<MuxId>,
}
