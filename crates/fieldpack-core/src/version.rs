use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreReleaseTag {
    Alpha,
    Beta,
    Preview,
    Rc,
}

impl PreReleaseTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Preview => "preview",
            Self::Rc => "rc",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "preview" => Some(Self::Preview),
            "rc" => Some(Self::Rc),
            _ => None,
        }
    }

    // beta and preview share a rank on purpose.
    fn rank(self) -> u8 {
        match self {
            Self::Alpha => 0,
            Self::Beta | Self::Preview => 1,
            Self::Rc => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreRelease {
    pub tag: PreReleaseTag,
    pub build: String,
}

/// A parsed application version: two to four numeric components plus an
/// optional pre-release tag and opaque build identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppVersion {
    parts: Vec<u32>,
    pre: Option<PreRelease>,
}

impl AppVersion {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        input.parse()
    }

    pub fn numeric_parts(&self) -> &[u32] {
        &self.parts
    }

    pub fn pre_release(&self) -> Option<&PreRelease> {
        self.pre.as_ref()
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    fn component(&self, index: usize) -> u32 {
        self.parts.get(index).copied().unwrap_or(0)
    }

    /// Precedence comparison: numeric tuple left to right with missing
    /// trailing components as zero, then release over pre-release, then
    /// pre-release rank. Two versions with equal tuple and equal rank
    /// compare equal here even when their build identifiers differ; callers
    /// needing a total order add modification time as a secondary key.
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        let width = self.parts.len().max(other.parts.len());
        for index in 0..width {
            match self.component(index).cmp(&other.component(index)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(left), Some(right)) => left.tag.rank().cmp(&right.tag.rank()),
        }
    }

    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.cmp_precedence(other) == Ordering::Greater
    }
}

impl FromStr for AppVersion {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let bare = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let (numeric, pre_raw) = match bare.split_once('-') {
            Some((numeric, pre_raw)) => (numeric, Some(pre_raw)),
            None => (bare, None),
        };

        let mut parts = Vec::new();
        for piece in numeric.split('.') {
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(EngineError::InvalidVersion(input.to_string()).into());
            }
            let value = piece
                .parse::<u32>()
                .map_err(|_| EngineError::InvalidVersion(input.to_string()))?;
            parts.push(value);
        }
        if parts.len() < 2 || parts.len() > 4 {
            return Err(EngineError::InvalidVersion(input.to_string()).into());
        }

        let pre = match pre_raw {
            None => None,
            Some(raw) => {
                let (tag_raw, build) = raw
                    .split_once('.')
                    .ok_or_else(|| EngineError::InvalidVersion(input.to_string()))?;
                let tag = PreReleaseTag::parse(tag_raw)
                    .ok_or_else(|| EngineError::InvalidVersion(input.to_string()))?;
                if build.is_empty() {
                    return Err(EngineError::InvalidVersion(input.to_string()).into());
                }
                Some(PreRelease {
                    tag,
                    build: build.to_string(),
                })
            }
        };

        Ok(Self { parts, pre })
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.parts.len().max(3);
        for index in 0..width {
            if index > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", self.component(index))?;
        }
        if let Some(pre) = &self.pre {
            write!(f, "-{}.{}", pre.tag.as_str(), pre.build)?;
        }
        Ok(())
    }
}

impl Serialize for AppVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AppVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
