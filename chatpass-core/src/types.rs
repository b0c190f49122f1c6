// chatpass-core/src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// A use count that is either finite or unlimited.
///
/// Configuration and snapshots write this as a plain integer or the string
/// `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "UsesRepr", into = "UsesRepr")]
pub enum Uses {
    Limited(u64),
    Unlimited,
}

impl Uses {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Uses::Unlimited)
    }

    /// Finite count, `None` when unlimited.
    pub fn count(&self) -> Option<u64> {
        match self {
            Uses::Limited(n) => Some(*n),
            Uses::Unlimited => None,
        }
    }

    /// Adds `other`. Unlimited absorbs everything; finite sums saturate.
    pub fn plus(self, other: Uses) -> Uses {
        match (self, other) {
            (Uses::Unlimited, _) | (_, Uses::Unlimited) => Uses::Unlimited,
            (Uses::Limited(a), Uses::Limited(b)) => Uses::Limited(a.saturating_add(b)),
        }
    }

    /// Whether at least `n` uses are available.
    pub fn covers(&self, n: u64) -> bool {
        match self {
            Uses::Unlimited => true,
            Uses::Limited(r) => *r >= n,
        }
    }
}

impl fmt::Display for Uses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uses::Limited(n) => write!(f, "{n}"),
            Uses::Unlimited => write!(f, "Unlimited"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum UsesRepr {
    Count(u64),
    Word(String),
}

impl TryFrom<UsesRepr> for Uses {
    type Error = String;

    fn try_from(value: UsesRepr) -> Result<Self, Self::Error> {
        match value {
            UsesRepr::Count(n) => Ok(Uses::Limited(n)),
            UsesRepr::Word(w) if w.eq_ignore_ascii_case("unlimited") => Ok(Uses::Unlimited),
            UsesRepr::Word(w) => Err(format!("expected a use count or \"unlimited\", got {w:?}")),
        }
    }
}

impl From<Uses> for UsesRepr {
    fn from(value: Uses) -> Self {
        match value {
            Uses::Limited(n) => UsesRepr::Count(n),
            Uses::Unlimited => UsesRepr::Word("unlimited".to_string()),
        }
    }
}

/// Periodic refill attached to a balance by the code that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPolicy {
    pub nominal: u64,
    pub cooldown_ms: u64,
}

/// What a single grant adds to a balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub amount: Uses,
    /// Code that issued the grant; becomes the balance's active code.
    pub source_code: Option<String>,
    pub reset: Option<ResetPolicy>,
}

impl Grant {
    /// Plain top-up with no code and no refill, e.g. a reward.
    pub fn uses(amount: Uses) -> Self {
        Self {
            amount,
            source_code: None,
            reset: None,
        }
    }
}
