use std::fmt;

use serde::{Deserialize, Serialize};

const AGENT_PREFIX: &str = "AI:";
const HUMAN_PREFIX: &str = "Human:";

/// Who an actor string refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActorKind {
    /// An automated agent, written `AI:<name>`.
    Agent,
    /// A person, written `Human:<email>`.
    Human,
    /// Any other free-form identity.
    Other,
}

/// Role-prefixed identity of whoever performed a ledger action.
///
/// The ledger itself stores actors as plain strings; this type only builds
/// and classifies the conventional forms.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// An automated agent, e.g. `Actor::agent("Accountant")` is `AI:Accountant`.
    pub fn agent(name: &str) -> Self {
        Self(format!("{AGENT_PREFIX}{name}"))
    }

    /// A person identified by email, e.g. `Human:jo@acme.com`.
    pub fn human(email: &str) -> Self {
        Self(format!("{HUMAN_PREFIX}{email}"))
    }

    pub fn kind(&self) -> ActorKind {
        if self.0.starts_with(AGENT_PREFIX) {
            ActorKind::Agent
        } else if self.0.starts_with(HUMAN_PREFIX) {
            ActorKind::Human
        } else {
            ActorKind::Other
        }
    }

    /// The identity with its role prefix removed.
    pub fn name(&self) -> &str {
        self.0
            .strip_prefix(AGENT_PREFIX)
            .or_else(|| self.0.strip_prefix(HUMAN_PREFIX))
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Actor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Actor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor({})", self.0)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_and_human_prefixes() {
        let a = Actor::agent("Accountant");
        assert_eq!(a.as_str(), "AI:Accountant");
        assert_eq!(a.kind(), ActorKind::Agent);
        assert_eq!(a.name(), "Accountant");

        let h = Actor::human("john@acme.com");
        assert_eq!(h.to_string(), "Human:john@acme.com");
        assert_eq!(h.kind(), ActorKind::Human);
        assert_eq!(h.name(), "john@acme.com");
    }

    #[test]
    fn free_form_actor() {
        let s = Actor::from("migration-script");
        assert_eq!(s.kind(), ActorKind::Other);
        assert_eq!(s.name(), "migration-script");
    }
}
