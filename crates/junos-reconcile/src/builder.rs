//! Change builder: desired state to ordered `delete` and `set` statements.
//!
//! Deletes run before sets. Deletes are emitted most specific first (the
//! reverse of the resource's canonical order); sets follow the canonical
//! order, which puts referenced objects before the objects that reference
//! them.

use std::fmt;

use junos_common::statement::dedup_statements;
use junos_common::{ConfigPath, JunosError, JunosResult, Statement};

use crate::resources::Resource;

/// Statements that move the device from one state to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Removals, most specific first
    pub to_delete: Vec<Statement>,
    /// Additions and changed values, in dependency order
    pub to_set: Vec<Statement>,
}

impl ChangeSet {
    /// Returns true when nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_set.is_empty()
    }

    /// Number of statements
    pub fn len(&self) -> usize {
        self.to_delete.len() + self.to_set.len()
    }

    /// All statements in submission order
    pub fn statements(&self) -> Vec<Statement> {
        self.to_delete.iter().chain(self.to_set.iter()).cloned().collect()
    }

    /// All statements rendered in submission order
    pub fn rendered(&self) -> Vec<String> {
        self.statements().iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in self.to_delete.iter().chain(self.to_set.iter()) {
            writeln!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

/// Statements creating `desired` from nothing
pub fn build_create<R: Resource>(desired: &R) -> JunosResult<ChangeSet> {
    desired.validate()?;
    Ok(ChangeSet {
        to_delete: Vec::new(),
        to_set: dedup_statements(desired.statements()),
    })
}

/// Statements removing everything `resource` owns, and nothing else
pub fn build_delete<R: Resource>(resource: &R) -> JunosResult<ChangeSet> {
    let to_delete = resource
        .owned_paths()
        .into_iter()
        .rev()
        .map(Statement::delete)
        .collect();
    Ok(ChangeSet {
        to_delete: dedup_statements(to_delete),
        to_set: Vec::new(),
    })
}

/// Statements turning `previous` into `desired`
pub fn build_update<R: Resource>(previous: &R, desired: &R) -> JunosResult<ChangeSet> {
    desired.validate()?;
    if previous.id() != desired.id() {
        return Err(JunosError::invalid_config(
            "id",
            format!(
                "cannot update {} into {}",
                previous.describe(),
                desired.describe()
            ),
        ));
    }

    let old = dedup_statements(previous.statements());
    let new = dedup_statements(desired.statements());

    let old_entries = previous.entry_paths();
    let new_entries = desired.entry_paths();
    let moved = if R::ordered_entries() {
        moved_entries(&old_entries, &new_entries)
    } else {
        Vec::new()
    };
    // Entries whose whole subtree is deleted with one statement
    let replaced: Vec<ConfigPath> = old_entries
        .iter()
        .filter(|e| !new_entries.contains(e) || moved.contains(e))
        .cloned()
        .collect();

    let mut to_delete: Vec<Statement> = Vec::new();
    for stmt in &old {
        if let Some(entry) = replaced.iter().find(|e| stmt.path.starts_with(e)) {
            push_delete(&mut to_delete, entry);
            continue;
        }
        // Same leaf still wanted; a changed value is overwritten by its set
        if new.iter().any(|n| n.path == stmt.path) {
            continue;
        }
        // Container still holding wanted statements
        if new.iter().any(|n| stmt.path.is_prefix_of(&n.tokens())) {
            continue;
        }
        push_delete(&mut to_delete, &stmt.path);
    }

    let to_set: Vec<Statement> = new
        .iter()
        .filter(|n| {
            if moved.iter().any(|e| n.path.starts_with(e)) {
                return true;
            }
            let unchanged = old.iter().any(|o| o.path == n.path && o.value == n.value);
            // A bare container already exists while old statements live below it
            let container_present =
                n.value.is_none() && old.iter().any(|o| n.path.is_prefix_of(&o.tokens()));
            !(unchanged || container_present)
        })
        .cloned()
        .collect();

    if !to_delete.is_empty() || !to_set.is_empty() {
        for sticky in desired.sticky_paths() {
            let wanted = new.iter().any(|n| n.path.starts_with(&sticky));
            if !wanted {
                push_delete(&mut to_delete, &sticky);
            }
        }
    }

    to_delete.reverse();
    Ok(ChangeSet { to_delete, to_set })
}

/// Adds a delete unless it, or an enclosing path, is already scheduled.
fn push_delete(to_delete: &mut Vec<Statement>, path: &ConfigPath) {
    if to_delete.iter().any(|d| path.starts_with(&d.path)) {
        return;
    }
    to_delete.push(Statement::delete(path.clone()));
}

/// Surviving entries that must be deleted and re-added to reach the desired
/// order. The device appends new entries at the end of the list.
fn moved_entries(old: &[ConfigPath], new: &[ConfigPath]) -> Vec<ConfigPath> {
    let surviving: Vec<&ConfigPath> = old.iter().filter(|e| new.contains(e)).collect();
    let mut next = 0;

    for (index, entry) in new.iter().enumerate() {
        let in_place = if old.contains(entry) {
            surviving.get(next) == Some(&entry)
        } else {
            next == surviving.len()
        };
        if !in_place {
            return new[index..]
                .iter()
                .filter(|e| old.contains(e))
                .cloned()
                .collect();
        }
        if old.contains(entry) {
            next += 1;
        }
    }
    Vec::new()
}
