//! Stored policy bindings.
//!
//! Rules are persisted and queried verbatim. Nothing here evaluates them.

use crate::error::StorageResult;
use crate::store::EntityStore;
use grnstore_model::AccessRule;
use rusqlite::{params, Row};

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<AccessRule> {
    let target: String = row.get(5)?;
    Ok(AccessRule {
        policy: row.get(0)?,
        scope: row.get(1)?,
        role: row.get(2)?,
        kind: row.get(3)?,
        verb: row.get(4)?,
        target: (!target.is_empty()).then_some(target),
    })
}

impl EntityStore {
    /// Stores a rule. Returns false when an identical rule already exists.
    pub fn add_access_rule(&self, rule: &AccessRule) -> StorageResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO entity_access_rule (policy, scope, role, kind, verb, target)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rule.policy,
                rule.scope,
                rule.role,
                rule.kind,
                rule.verb,
                rule.target.as_deref().unwrap_or_default(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Removes every rule of `policy`. Returns the number removed.
    pub fn remove_policy_rules(&self, policy: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM entity_access_rule WHERE policy = ?1",
            params![policy],
        )?;
        Ok(removed)
    }

    pub fn rules_for_policy(&self, policy: &str) -> StorageResult<Vec<AccessRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT policy, scope, role, kind, verb, target FROM entity_access_rule
             WHERE policy = ?1 ORDER BY scope, role, kind, verb, target",
        )?;
        let rules = stmt
            .query_map(params![policy], rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Rules granted to `role` within `scope`, across policies.
    pub fn find_access_rules(&self, scope: &str, role: &str) -> StorageResult<Vec<AccessRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT policy, scope, role, kind, verb, target FROM entity_access_rule
             WHERE scope = ?1 AND role = ?2 ORDER BY policy, kind, verb, target",
        )?;
        let rules = stmt
            .query_map(params![scope, role], rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}
