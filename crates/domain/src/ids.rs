use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// An agent's unique name. Distinct from location and conversation ids so
    /// the three can never be interchanged by accident.
    AgentName
);

string_id!(
    /// Identifier of a place in the world.
    LocationId
);

string_id!(
    /// Identifier of a conversation. Minted as a short uuid prefix when an
    /// invitation is issued for a conversation that does not exist yet.
    ConversationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let name = AgentName::new("Ember");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"Ember\"");
        let back: AgentName = serde_json::from_str("\"Ember\"").unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn ids_are_usable_as_map_keys() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(LocationId::from("workshop"), 1);
        assert_eq!(map.get(&LocationId::from("workshop")), Some(&1));
    }
}
