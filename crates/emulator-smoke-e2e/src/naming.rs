//! Unique resource names
//!
//! Every fixture names its resources `<prefix><suffix>` with an 8-character
//! lowercase hex suffix, so concurrent runs against one emulator never
//! collide.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Length of the random suffix appended to every generated name
pub const SUFFIX_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {kind} name {name:?}: {reason}")]
pub struct NamingError {
    pub kind: ResourceKind,
    pub name: String,
    pub reason: &'static str,
}

/// 8 lowercase hex characters from a random UUID v4
pub fn unique_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(SUFFIX_LEN);
    suffix
}

pub fn unique_name(prefix: &str) -> String {
    format!("{}{}", prefix, unique_suffix())
}

/// Kinds of emulator resource with their own naming rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Cosmos DB database id
    Database,
    BlobContainer,
    Blob,
    /// Storage queue
    Queue,
    Table,
    /// Cosmos DB item id or MongoDB `_id`
    Item,
    RowKey,
    /// Service Bus queue
    BusQueue,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::BlobContainer => "blob container",
            ResourceKind::Blob => "blob",
            ResourceKind::Queue => "queue",
            ResourceKind::Table => "table",
            ResourceKind::Item => "item",
            ResourceKind::RowKey => "row key",
            ResourceKind::BusQueue => "service bus queue",
        }
    }

    /// Check `name` against the owning service's rules
    pub fn validate(&self, name: &str) -> Result<(), NamingError> {
        let result = match self {
            ResourceKind::BlobContainer | ResourceKind::Queue => dns_style(name),
            ResourceKind::Table => table_style(name),
            ResourceKind::Database | ResourceKind::Item => cosmos_id(name),
            ResourceKind::Blob => blob_name(name),
            ResourceKind::RowKey => row_key(name),
            ResourceKind::BusQueue => bus_entity(name),
        };
        result.map_err(|reason| NamingError {
            kind: *self,
            name: name.to_string(),
            reason,
        })
    }

    /// Generate a unique name with `prefix` and validate it
    ///
    /// # Errors
    ///
    /// Returns `NamingError` if the prefix makes the name invalid for this
    /// kind, e.g. `test_` for a blob container.
    pub fn generate(&self, prefix: &str) -> Result<String, NamingError> {
        let name = unique_name(prefix);
        self.validate(&name)?;
        Ok(name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn length(name: &str, min: usize, max: usize) -> Result<(), &'static str> {
    let len = name.chars().count();
    if len < min {
        return Err("too short");
    }
    if len > max {
        return Err("too long");
    }
    Ok(())
}

/// Blob containers and storage queues: 3-63 of `[a-z0-9-]`, alphanumeric
/// at both ends, no `--`
fn dns_style(name: &str) -> Result<(), &'static str> {
    length(name, 3, 63)?;
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err("only lowercase letters, digits and hyphens are allowed");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("must start and end with a letter or digit");
    }
    if name.contains("--") {
        return Err("consecutive hyphens are not allowed");
    }
    Ok(())
}

/// Tables: 3-63 alphanumerics starting with a letter
fn table_style(name: &str) -> Result<(), &'static str> {
    length(name, 3, 63)?;
    if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err("only letters and digits are allowed");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("must start with a letter");
    }
    Ok(())
}

fn cosmos_id(name: &str) -> Result<(), &'static str> {
    length(name, 1, 255)?;
    if name.contains(['/', '\\', '?', '#']) {
        return Err("'/', '\\', '?' and '#' are not allowed");
    }
    if name.ends_with(' ') {
        return Err("must not end with a space");
    }
    Ok(())
}

fn blob_name(name: &str) -> Result<(), &'static str> {
    length(name, 1, 1024)?;
    if name.ends_with('.') || name.ends_with('/') {
        return Err("must not end with '.' or '/'");
    }
    Ok(())
}

fn row_key(name: &str) -> Result<(), &'static str> {
    length(name, 1, 1024)?;
    if name.contains(['/', '\\', '?', '#']) || name.chars().any(char::is_control) {
        return Err("'/', '\\', '?', '#' and control characters are not allowed");
    }
    Ok(())
}

/// Service Bus entities: 1-260 of `[A-Za-z0-9._-/]`, alphanumeric at both ends
fn bus_entity(name: &str) -> Result<(), &'static str> {
    length(name, 1, 260)?;
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'/'))
    {
        return Err("only letters, digits, '.', '_', '-' and '/' are allowed");
    }
    let alnum_edge = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum_edge(name.chars().next()) || !alnum_edge(name.chars().last()) {
        return Err("must start and end with a letter or digit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_suffix_shape() {
        let suffix = unique_suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }

    #[test]
    fn test_unique_names_do_not_repeat() {
        let names: HashSet<String> = (0..1000).map(|_| unique_name("testcontainer")).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_fixture_prefixes_are_valid() {
        assert!(ResourceKind::Database.generate("testdb_").is_ok());
        assert!(ResourceKind::BlobContainer.generate("testcontainer").is_ok());
        assert!(ResourceKind::Queue.generate("testqueue").is_ok());
        assert!(ResourceKind::Table.generate("testtable").is_ok());
        assert!(ResourceKind::Item.generate("item_").is_ok());
        assert!(ResourceKind::RowKey.generate("test-row-").is_ok());
        assert!(ResourceKind::BusQueue.generate("testqueue").is_ok());
    }

    #[test]
    fn test_container_rules() {
        let kind = ResourceKind::BlobContainer;
        assert!(kind.validate("abc").is_ok());
        assert!(kind.validate("ab").is_err());
        assert!(kind.validate(&"a".repeat(64)).is_err());
        assert!(kind.validate("Upper").is_err());
        assert!(kind.validate("test_container").is_err());
        assert!(kind.validate("-abc").is_err());
        assert!(kind.validate("a--b").is_err());
    }

    #[test]
    fn test_table_rules() {
        let kind = ResourceKind::Table;
        assert!(kind.validate("TestTable1").is_ok());
        assert!(kind.validate("1table").is_err());
        assert!(kind.validate("test-table").is_err());
    }

    #[test]
    fn test_generate_rejects_bad_prefix() {
        let err = ResourceKind::Table.generate("test_").unwrap_err();
        assert_eq!(err.kind, ResourceKind::Table);
        assert_eq!(err.reason, "only letters and digits are allowed");
        assert!(err.to_string().starts_with("invalid table name"));
    }

    #[test]
    fn test_bus_queue_rules() {
        let kind = ResourceKind::BusQueue;
        assert!(kind.validate("queue.1").is_ok());
        assert!(kind.validate("queue.").is_err());
        assert!(kind.validate("q ueue").is_err());
    }

    proptest! {
        #[test]
        fn prop_generated_container_names_validate(prefix in "[a-z][a-z0-9]{2,20}") {
            let name = ResourceKind::BlobContainer.generate(&prefix).unwrap();
            prop_assert!(name.starts_with(&prefix));
            prop_assert_eq!(name.len(), prefix.len() + SUFFIX_LEN);
        }

        #[test]
        fn prop_generated_table_names_validate(prefix in "[A-Za-z][A-Za-z0-9]{2,20}") {
            prop_assert!(ResourceKind::Table.generate(&prefix).is_ok());
        }

        #[test]
        fn prop_cosmos_ids_reject_slash(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
            let name = format!("{}/{}", a, b);
            prop_assert!(ResourceKind::Item.validate(&name).is_err());
        }
    }
}
