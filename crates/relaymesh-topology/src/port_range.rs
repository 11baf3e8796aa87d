//! Agent port-range configuration
//!
//! Agents advertise which ports rules may bind on them as a comma separated
//! list of single ports and `start-end` ranges, e.g. `"80,443,8000-9000"`.
//!
//! An empty range set means "no constraint": every port is allowed and
//! [`PortRange::total_ports`] reports `0` so callers know to supply their own
//! default universe.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a port-range specification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortRangeError {
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Port {0} is out of range (1-65535)")]
    OutOfBounds(u32),

    #[error("Invalid port range {start}-{end}: start must not exceed end")]
    ReversedRange { start: u16, end: u16 },

    #[error("Invalid port range entry: {0}")]
    InvalidEntry(String),

    #[error("Port range specification contains no ports: {0:?}")]
    NoPorts(String),
}

/// A closed interval of ports, `start..=end`.
///
/// Only constructible through [`PortInterval::new`] and [`PortInterval::single`],
/// so `1 <= start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortInterval {
    start: u16,
    end: u16,
}

impl PortInterval {
    pub fn new(start: u16, end: u16) -> Result<Self, PortRangeError> {
        if start == 0 {
            return Err(PortRangeError::OutOfBounds(0));
        }
        if start > end {
            return Err(PortRangeError::ReversedRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Result<Self, PortRangeError> {
        Self::new(port, port)
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    /// Number of ports in the interval (always at least 1).
    pub fn len(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    fn parse(entry: &str) -> Result<Self, PortRangeError> {
        match entry.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start.trim())?;
                let end = parse_port(end.trim())?;
                Self::new(start, end)
            }
            None => Self::single(parse_port(entry)?),
        }
    }
}

impl fmt::Display for PortInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

fn parse_port(s: &str) -> Result<u16, PortRangeError> {
    if s.is_empty() || s.contains('-') {
        return Err(PortRangeError::InvalidEntry(s.to_string()));
    }
    let value: u32 = s
        .parse()
        .map_err(|_| PortRangeError::InvalidPort(s.to_string()))?;
    if value == 0 || value > u32::from(u16::MAX) {
        return Err(PortRangeError::OutOfBounds(value));
    }
    Ok(value as u16)
}

/// A set of allowed ports.
///
/// Intervals are kept sorted by start port with overlapping intervals merged,
/// so every allowed port is counted once and two ranges parsed from the same
/// entries in a different order compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    intervals: Vec<PortInterval>,
}

impl PortRange {
    /// A range that allows every port.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Build a range from validated intervals, merging any that overlap.
    pub fn from_intervals(mut intervals: Vec<PortInterval>) -> Self {
        intervals.sort();

        let mut merged: Vec<PortInterval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match merged.last_mut() {
                Some(last) if interval.start <= last.end => {
                    last.end = last.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }

        Self { intervals: merged }
    }

    /// Parse a specification such as `"80,443,8000-9000"`.
    ///
    /// Blank input yields an unconstrained range. Empty entries between commas
    /// are skipped, but non-blank input that contains no ports at all (`","`) is
    /// rejected, as is any malformed or out-of-bounds entry.
    pub fn parse(spec: &str) -> Result<Self, PortRangeError> {
        if spec.trim().is_empty() {
            return Ok(Self::unconstrained());
        }

        let intervals = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PortInterval::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if intervals.is_empty() {
            return Err(PortRangeError::NoPorts(spec.to_string()));
        }

        Ok(Self::from_intervals(intervals))
    }

    pub fn is_unconstrained(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[PortInterval] {
        &self.intervals
    }

    /// Whether `port` is allowed. An unconstrained range allows everything.
    pub fn contains(&self, port: u16) -> bool {
        self.is_unconstrained() || self.intervals.iter().any(|i| i.contains(port))
    }

    /// Sum of interval sizes; `0` for an unconstrained range.
    pub fn total_ports(&self) -> u32 {
        self.intervals.iter().map(PortInterval::len).sum()
    }

    /// Pick a port uniformly over the union of all intervals using the
    /// thread-local RNG. Returns `None` for an unconstrained range.
    pub fn random_port(&self) -> Option<u16> {
        self.random_port_with(&mut rand::thread_rng())
    }

    /// Like [`random_port`](Self::random_port) with a caller-supplied RNG.
    ///
    /// Larger intervals are proportionally more likely to be chosen.
    pub fn random_port_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u16> {
        let total = self.total_ports();
        if total == 0 {
            return None;
        }

        let mut index = rng.gen_range(0..total);
        for interval in &self.intervals {
            let size = interval.len();
            if index < size {
                return Some(interval.start + index as u16);
            }
            index -= size;
        }

        None
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", interval)?;
        }
        Ok(())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PortRange {
    type Error = PortRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> Self {
        range.to_string()
    }
}
