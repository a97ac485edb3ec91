use super::{HookError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase of a lifecycle hook relative to the storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Runs before (and guards) the storage call
    On,
    /// Runs once the storage call has completed
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::On => "ON",
            Phase::After => "AFTER",
        }
    }
}

/// The CRUD verb of the surrounding repository operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CrudVerb {
    Create,
    Read,
    Update,
    Delete,
}

impl CrudVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudVerb::Create => "CREATE",
            CrudVerb::Read => "READ",
            CrudVerb::Update => "UPDATE",
            CrudVerb::Delete => "DELETE",
        }
    }
}

/// Composite key identifying which behaviors apply to an operation.
///
/// Rendered as `ON_CREATE`, `AFTER_UPDATE` etc. so declarations can address
/// keys by string, including regex patterns expanded over [`OperationKey::all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub phase: Phase,
    pub verb: CrudVerb,
}

impl OperationKey {
    pub const fn new(phase: Phase, verb: CrudVerb) -> Self {
        Self { phase, verb }
    }

    /// All eight phase/verb combinations.
    pub fn all() -> [OperationKey; 8] {
        use CrudVerb::*;
        use Phase::*;
        [
            OperationKey::new(On, Create),
            OperationKey::new(On, Read),
            OperationKey::new(On, Update),
            OperationKey::new(On, Delete),
            OperationKey::new(After, Create),
            OperationKey::new(After, Read),
            OperationKey::new(After, Update),
            OperationKey::new(After, Delete),
        ]
    }

    /// Expand a declaration string into the concrete keys it addresses.
    ///
    /// The pattern is matched anchored against each rendered key, so
    /// `"ON_CREATE"` selects one key and `"(ON|AFTER)_UPDATE"` selects two.
    /// A pattern matching no key is an error.
    pub fn expand(pattern: &str) -> Result<Vec<OperationKey>> {
        let re = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| HookError::InvalidOperationKey(format!("{pattern}: {e}")))?;

        let keys: Vec<OperationKey> = Self::all()
            .into_iter()
            .filter(|key| re.is_match(&key.to_string()))
            .collect();

        if keys.is_empty() {
            return Err(HookError::InvalidOperationKey(format!(
                "'{pattern}' matches no operation"
            )));
        }
        Ok(keys)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.phase.as_str(), self.verb.as_str())
    }
}

impl FromStr for OperationKey {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self> {
        let keys = Self::all();
        keys.into_iter()
            .find(|key| key.to_string() == s)
            .ok_or_else(|| HookError::InvalidOperationKey(s.to_string()))
    }
}

/// Explicit ordering of a behavior across all properties of one operation.
///
/// Behaviors declared without hints run after every hinted behavior, stable
/// in their resolution order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderingHints {
    pub priority: i32,
    pub group: Option<String>,
    pub group_priority: i32,
}

impl OrderingHints {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}
