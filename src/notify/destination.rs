//! Destination resolver -- maps a ward to the phone number that receives
//! its surgery list.
//!
//! Rules live in the shared `lookups` table under the `location` category,
//! keyed by ward name. Only active rows count.

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::storage::Pool;

/// Lookup category holding ward → phone rules.
pub const LOCATION_CATEGORY: &str = "location";

/// One lookup row mapping a ward to a messaging address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRule {
    pub category: String,
    /// Ward name (grouping key).
    pub name: String,
    /// Destination phone number.
    pub value: String,
    pub label: Option<String>,
    pub active: bool,
}

impl DestinationRule {
    pub fn location(ward: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            category: LOCATION_CATEGORY.to_string(),
            name: ward.into(),
            value: phone.into(),
            label: None,
            active: true,
        }
    }
}

/// A usable destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Destination {
    pub phone: String,
    /// Display name used in message headers; falls back to the ward name.
    pub label: String,
}

/// Outcome of resolving a ward.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Destination),
    /// No active rule for the ward.
    NoRule,
    /// An active rule exists but its address is blank.
    EmptyAddress,
}

impl Resolution {
    /// Human-readable reason when the ward cannot be notified.
    pub fn skip_reason(&self, ward: &str) -> Option<String> {
        match self {
            Resolution::Resolved(_) => None,
            Resolution::NoRule => Some(format!("no active destination configured for '{}'", ward)),
            Resolution::EmptyAddress => {
                Some(format!("destination for '{}' has an empty phone number", ward))
            }
        }
    }

    pub fn destination(self) -> Option<Destination> {
        match self {
            Resolution::Resolved(d) => Some(d),
            _ => None,
        }
    }
}

/// Resolve the active destination for `ward`.
pub fn resolve(pool: &Pool, ward: &str) -> Result<Resolution> {
    let conn = pool.get().context("Failed to get DB connection")?;
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT value, label FROM lookups
             WHERE category = ?1 AND name = ?2 AND active = 1
             ORDER BY id DESC LIMIT 1",
            params![LOCATION_CATEGORY, ward],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("Failed to query destination rules")?;

    let Some((value, label)) = row else {
        return Ok(Resolution::NoRule);
    };

    let phone = value.trim();
    if phone.is_empty() {
        return Ok(Resolution::EmptyAddress);
    }

    Ok(Resolution::Resolved(Destination {
        phone: phone.to_string(),
        label: label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| ward.to_string()),
    }))
}

/// Insert or replace the rule for (category, name).
pub fn upsert_rule(pool: &Pool, rule: &DestinationRule) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO lookups (category, name, value, label, active)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (category, name) DO UPDATE SET
            value = excluded.value,
            label = excluded.label,
            active = excluded.active,
            updated_at = datetime('now')",
        params![rule.category, rule.name, rule.value, rule.label, rule.active],
    )
    .context("Failed to upsert destination rule")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_memory_pool;

    #[test]
    fn test_resolve_active_rule() {
        let pool = open_memory_pool().unwrap();
        let mut rule = DestinationRule::location("Ward A", " 0901234567 ");
        rule.label = Some("Surgical Ward A".to_string());
        upsert_rule(&pool, &rule).unwrap();

        let dest = resolve(&pool, "Ward A").unwrap().destination().unwrap();
        assert_eq!(dest.phone, "0901234567");
        assert_eq!(dest.label, "Surgical Ward A");
    }

    #[test]
    fn test_inactive_and_missing_rules() {
        let pool = open_memory_pool().unwrap();
        let mut rule = DestinationRule::location("Ward B", "0900000000");
        rule.active = false;
        upsert_rule(&pool, &rule).unwrap();

        assert_eq!(resolve(&pool, "Ward B").unwrap(), Resolution::NoRule);
        assert_eq!(resolve(&pool, "Ward Z").unwrap(), Resolution::NoRule);
        assert!(resolve(&pool, "Ward Z")
            .unwrap()
            .skip_reason("Ward Z")
            .unwrap()
            .contains("Ward Z"));
    }

    #[test]
    fn test_empty_address_is_distinct() {
        let pool = open_memory_pool().unwrap();
        upsert_rule(&pool, &DestinationRule::location("Ward C", "   ")).unwrap();
        assert_eq!(resolve(&pool, "Ward C").unwrap(), Resolution::EmptyAddress);
    }

    #[test]
    fn test_other_categories_ignored() {
        let pool = open_memory_pool().unwrap();
        let mut rule = DestinationRule::location("Ward A", "0901");
        rule.category = "department".to_string();
        upsert_rule(&pool, &rule).unwrap();
        assert_eq!(resolve(&pool, "Ward A").unwrap(), Resolution::NoRule);
    }
}
