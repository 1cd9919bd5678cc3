use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Ordered clinical severity. Declaration order is the total order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    #[default]
    Bajo,
    Medio,
    Alto,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bajo => "BAJO",
            Self::Medio => "MEDIO",
            Self::Alto => "ALTO",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five classes the intake classifier can emit.
///
/// Variant order matches the registry index, so the derived `Ord` is the
/// index order used for dominant-label tie-breaks and for map iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentLabel {
    Anxiety,
    Suicidal,
    Anger,
    Sadness,
    Frustration,
}

impl SentimentLabel {
    pub const ALL: [SentimentLabel; 5] = [
        Self::Anxiety,
        Self::Suicidal,
        Self::Anger,
        Self::Sadness,
        Self::Frustration,
    ];

    pub fn from_index(index: i64) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(EngineError::InvalidLabelIndex(index))
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        Self::ALL
            .into_iter()
            .find(|label| label.name() == trimmed)
            .ok_or_else(|| EngineError::UnknownLabelName(name.to_string()))
    }

    pub fn index(&self) -> i64 {
        match self {
            Self::Anxiety => 0,
            Self::Suicidal => 1,
            Self::Anger => 2,
            Self::Sadness => 3,
            Self::Frustration => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Anxiety => "ANXIETY",
            Self::Suicidal => "SUICIDAL",
            Self::Anger => "ANGER",
            Self::Sadness => "SADNESS",
            Self::Frustration => "FRUSTRATION",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anxiety => "Anxiety",
            Self::Suicidal => "Suicidal",
            Self::Anger => "Anger",
            Self::Sadness => "Sadness",
            Self::Frustration => "Frustration",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Anxiety => "Anxious or worried state",
            Self::Suicidal => "Suicidal thoughts or expressions",
            Self::Anger => "Angry or frustrated state",
            Self::Sadness => "Sad or depressed state",
            Self::Frustration => "Frustrated state",
        }
    }

    /// Fixed clinical tier for the label. Confidence plays no part here.
    pub fn risk_tier(&self) -> RiskTier {
        match self {
            Self::Suicidal => RiskTier::Alto,
            Self::Anxiety | Self::Anger | Self::Sadness => RiskTier::Medio,
            Self::Frustration => RiskTier::Bajo,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SentimentLabel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}
