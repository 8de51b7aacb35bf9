use crate::*;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The tenant (client) every coordinator call is made on behalf of.
///
/// Records of different tenants never see each other.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tenant(String);

impl Tenant {
    /// Tenant ids end up in file paths, so only `[A-Za-z0-9_-]` is accepted.
    pub fn new(id: &str) -> Result<Self, Error> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidArgument(format!("invalid tenant id '{}'", id)));
        }
        Ok(Tenant(id.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collections of documents held by a repository
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    KeyCeremony,
    KeyGuardian,
    Manifest,
    Election,
    SubmittedBallot,
    BallotInventory,
    CiphertextTally,
    PlaintextTally,
    DecryptionShare,
    BallotDecryptionShare,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::KeyCeremony => "key_ceremony",
            Collection::KeyGuardian => "key_guardian",
            Collection::Manifest => "manifest",
            Collection::Election => "election",
            Collection::SubmittedBallot => "submitted_ballot",
            Collection::BallotInventory => "ballot_inventory",
            Collection::CiphertextTally => "ciphertext_tally",
            Collection::PlaintextTally => "plaintext_tally",
            Collection::DecryptionShare => "decryption_share",
            Collection::BallotDecryptionShare => "ballot_decryption_share",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored document together with its revision.
///
/// The revision starts at 1 and increases by one on every write, and is the
/// token for compare-and-swap updates.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub revision: u64,
    pub value: T,
}

/// A conjunction of top-level field equalities. The empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    fields: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    /// Require `field` to equal `value`
    pub fn eq<V: Into<Value>>(mut self, field: &str, value: V) -> Self {
        self.fields.insert(field.to_owned(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }
}

/// Build an unambiguous key out of several identifiers.
///
/// Identifiers are caller supplied and may contain any separator, so the parts
/// are encoded as a JSON array.
pub fn compound_key(parts: &[&str]) -> String {
    Value::from(parts.to_vec()).to_string()
}

/// Repository errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ballotguard store: {collection} {key} not found")]
    NotFound { collection: Collection, key: String },

    #[error("ballotguard store: {collection} {key} already exists")]
    AlreadyExists { collection: Collection, key: String },

    #[error("ballotguard store: concurrent write to {collection} {key}")]
    Conflict { collection: Collection, key: String },

    #[error("ballotguard store: io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ballotguard store: serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A document repository
///
/// Implementations must give read-after-write consistency per key. No
/// cross-key transactions are required; `update` is a per-key compare-and-swap.
pub trait Repository: Send + Sync {
    /// Get a single document
    fn get(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
    ) -> Result<Option<Versioned<Value>>, StoreError>;

    /// Find documents matching `filter`, in key order
    fn find(
        &self,
        tenant: &Tenant,
        collection: Collection,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert a new document, returning its revision
    fn set(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<u64, StoreError>;

    /// Replace a document if it is still at `expected_revision`
    fn update(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        expected_revision: u64,
        value: Value,
    ) -> Result<u64, StoreError>;

    /// Insert or replace a document regardless of its revision
    fn upsert(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<u64, StoreError>;
}

pub(crate) type Documents = BTreeMap<String, Versioned<Value>>;

pub(crate) fn find_in(
    documents: &Documents,
    filter: &Filter,
    skip: usize,
    limit: usize,
) -> Vec<Value> {
    documents
        .values()
        .filter(|doc| filter.matches(&doc.value))
        .skip(skip)
        .take(limit)
        .map(|doc| doc.value.clone())
        .collect()
}

pub(crate) fn insert_in(
    documents: &mut Documents,
    collection: Collection,
    key: &str,
    value: Value,
) -> Result<u64, StoreError> {
    if documents.contains_key(key) {
        return Err(StoreError::AlreadyExists {
            collection,
            key: key.to_owned(),
        });
    }
    documents.insert(key.to_owned(), Versioned { revision: 1, value });
    Ok(1)
}

pub(crate) fn update_in(
    documents: &mut Documents,
    collection: Collection,
    key: &str,
    expected_revision: u64,
    value: Value,
) -> Result<u64, StoreError> {
    match documents.get_mut(key) {
        None => Err(StoreError::NotFound {
            collection,
            key: key.to_owned(),
        }),
        Some(doc) if doc.revision != expected_revision => Err(StoreError::Conflict {
            collection,
            key: key.to_owned(),
        }),
        Some(doc) => {
            doc.revision += 1;
            doc.value = value;
            Ok(doc.revision)
        }
    }
}

pub(crate) fn upsert_in(documents: &mut Documents, key: &str, value: Value) -> u64 {
    let revision = documents.get(key).map(|doc| doc.revision + 1).unwrap_or(1);
    documents.insert(key.to_owned(), Versioned { revision, value });
    revision
}

/// A simple repository that keeps everything in memory
#[derive(Default)]
pub struct MemRepository {
    inner: RwLock<BTreeMap<(Tenant, Collection), Documents>>,
}

impl MemRepository {
    pub fn new() -> Self {
        MemRepository::default()
    }
}

impl Repository for MemRepository {
    fn get(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
    ) -> Result<Option<Versioned<Value>>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .get(&(tenant.clone(), collection))
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn find(
        &self,
        tenant: &Tenant,
        collection: Collection,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .get(&(tenant.clone(), collection))
            .map(|docs| find_in(docs, filter, skip, limit))
            .unwrap_or_default())
    }

    fn set(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let docs = inner.entry((tenant.clone(), collection)).or_default();
        insert_in(docs, collection, key, value)
    }

    fn update(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        expected_revision: u64,
        value: Value,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let docs = inner.entry((tenant.clone(), collection)).or_default();
        update_in(docs, collection, key, expected_revision, value)
    }

    fn upsert(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let docs = inner.entry((tenant.clone(), collection)).or_default();
        Ok(upsert_in(docs, key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tenant() -> Tenant {
        Tenant::new("test-tenant").unwrap()
    }

    #[test]
    fn set_rejects_duplicates() {
        let repo = MemRepository::new();
        repo.set(&tenant(), Collection::KeyCeremony, "k1", json!({"key_name": "k1"}))
            .unwrap();
        let err = repo
            .set(&tenant(), Collection::KeyCeremony, "k1", json!({"key_name": "k1"}))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn update_is_compare_and_swap() {
        let repo = MemRepository::new();
        let t = tenant();
        let rev = repo
            .set(&t, Collection::KeyCeremony, "k1", json!({"state": "CREATED"}))
            .unwrap();

        let rev2 = repo
            .update(&t, Collection::KeyCeremony, "k1", rev, json!({"state": "OPEN"}))
            .unwrap();
        assert_eq!(rev2, rev + 1);

        // A writer holding the stale revision must not clobber the newer value
        let err = repo
            .update(&t, Collection::KeyCeremony, "k1", rev, json!({"state": "CLOSED"}))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = repo.get(&t, Collection::KeyCeremony, "k1").unwrap().unwrap();
        assert_eq!(stored.value, json!({"state": "OPEN"}));
    }

    #[test]
    fn update_missing_is_not_found() {
        let repo = MemRepository::new();
        let err = repo
            .update(&tenant(), Collection::Election, "nope", 1, json!({}))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn tenants_are_isolated() {
        let repo = MemRepository::new();
        let a = Tenant::new("a").unwrap();
        let b = Tenant::new("b").unwrap();
        repo.set(&a, Collection::Election, "e1", json!({"election_id": "e1"}))
            .unwrap();
        assert!(repo.get(&b, Collection::Election, "e1").unwrap().is_none());
        assert!(repo
            .find(&b, Collection::Election, &Filter::new(), 0, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn tenant_ids_are_path_safe() {
        assert!(Tenant::new("client_1-a").is_ok());
        assert!(Tenant::new("").is_err());
        assert!(Tenant::new("../etc").is_err());
    }

    #[test]
    fn compound_keys_do_not_collide() {
        assert_ne!(compound_key(&["a/b", "c"]), compound_key(&["a", "b/c"]));
    }

    proptest! {
        #[test]
        fn find_honours_filter_skip_and_limit(
            states in proptest::collection::vec(0u8..3, 0..40),
            skip in 0usize..10,
            limit in 0usize..10,
        ) {
            let repo = MemRepository::new();
            let t = tenant();
            for (i, state) in states.iter().enumerate() {
                let key = format!("{:03}", i);
                repo.set(&t, Collection::SubmittedBallot, &key, json!({"n": i, "state": state})).unwrap();
            }

            let filter = Filter::new().eq("state", 1);
            let found = repo.find(&t, Collection::SubmittedBallot, &filter, skip, limit).unwrap();

            let expected: Vec<usize> = states
                .iter()
                .enumerate()
                .filter(|(_, s)| **s == 1)
                .map(|(i, _)| i)
                .skip(skip)
                .take(limit)
                .collect();
            let found: Vec<usize> = found.iter().map(|v| v["n"].as_u64().unwrap() as usize).collect();
            prop_assert_eq!(found, expected);
        }
    }
}
