//! Port ranges for connect-mode scanning.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inclusive range of ports to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Every port in the range once, ascending. Empty when `start > end`.
    ///
    /// Stepping is done by the inclusive range, so a range ending at 65535 stops
    /// there instead of wrapping.
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start != 0 && self.start <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = String;

    /// Parse `start-end` or a single port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|e| format!("invalid port {p:?}: {e}"))
        };
        match s.split_once('-') {
            Some((start, end)) => Ok(Self::new(parse(start)?, parse(end)?)),
            None => {
                let port = parse(s)?;
                Ok(Self::new(port, port))
            }
        }
    }
}
