//! Shared serde helpers for loosely shaped configuration values.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

/// Items of one vault: accepts either a single string or a list of strings.
///
/// Both of these YAML (or JSON) shapes decode to the same value:
///
/// ```yaml
/// vaults:
///   secrets: db_password
///   certs: [web, api]
/// ```
///
/// Any other shape (numbers, maps, nested lists) is rejected with a
/// descriptive error instead of being silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VaultItems(pub Vec<String>);

impl VaultItems {
    /// Returns the item names in configuration order.
    pub fn items(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for VaultItems {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ItemsVisitor;

        impl<'de> Visitor<'de> for ItemsVisitor {
            type Value = VaultItems;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a vault item name or a list of vault item names")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(VaultItems(vec![v.to_string()]))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(VaultItems(items))
            }
        }

        deserializer.deserialize_any(ItemsVisitor)
    }
}

/// Vault name to items, ordered by vault name for deterministic command order.
pub type VaultMap = BTreeMap<String, VaultItems>;

/// Parses the `vault_json` string form of the vault map.
pub fn parse_vault_json(raw: &str) -> Result<VaultMap, serde_json::Error> {
    serde_json::from_str(raw)
}
