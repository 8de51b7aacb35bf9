use crate::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Attempts a `modify` makes before giving up on a contended record
const MAX_MODIFY_ATTEMPTS: usize = 64;

/// A document type stored in a repository collection
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    /// The key this record is stored under
    fn key(&self) -> String;
}

/// Typed access to one collection of a repository
pub struct TypedStore<T> {
    repo: Arc<dyn Repository>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        TypedStore {
            repo: self.repo.clone(),
            _record: PhantomData,
        }
    }
}

pub type CeremonyStore = TypedStore<KeyCeremony>;
pub type GuardianStatusStore = TypedStore<KeyCeremonyGuardian>;
pub type ManifestStore = TypedStore<StoredManifest>;
pub type ElectionStore = TypedStore<Election>;
pub type BallotStore = TypedStore<SubmittedBallot>;
pub type BallotInventoryStore = TypedStore<BallotInventory>;
pub type TallyStore = TypedStore<CiphertextTally>;
pub type PlaintextTallyStore = TypedStore<PlaintextTally>;
pub type DecryptionShareStore = TypedStore<DecryptionShare>;
pub type BallotShareStore = TypedStore<BallotDecryptionShare>;

impl<T: Record> TypedStore<T> {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        TypedStore {
            repo,
            _record: PhantomData,
        }
    }

    pub fn get(&self, tenant: &Tenant, key: &str) -> Result<Option<T>, Error> {
        match self.repo.get(tenant, T::COLLECTION, key)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.value)?)),
            None => Ok(None),
        }
    }

    /// Like `get`, but a missing record is `Error::NotFound`
    pub fn require(&self, tenant: &Tenant, key: &str) -> Result<T, Error> {
        self.get(tenant, key)?
            .ok_or_else(|| Error::NotFound(format!("{} {}", T::COLLECTION, key)))
    }

    pub fn find(
        &self,
        tenant: &Tenant,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<T>, Error> {
        self.repo
            .find(tenant, T::COLLECTION, filter, skip, limit)?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    /// Insert a new record; `Error::AlreadyExists` if the key is taken
    pub fn create(&self, tenant: &Tenant, record: &T) -> Result<(), Error> {
        let value = serde_json::to_value(record)?;
        self.repo.set(tenant, T::COLLECTION, &record.key(), value)?;
        Ok(())
    }

    /// Insert or overwrite a record
    pub fn put(&self, tenant: &Tenant, record: &T) -> Result<(), Error> {
        let value = serde_json::to_value(record)?;
        self.repo.upsert(tenant, T::COLLECTION, &record.key(), value)?;
        Ok(())
    }

    /// Read-modify-write a record with optimistic concurrency.
    ///
    /// `f` may run several times if other writers race on the same key, so it
    /// must only depend on the record it is handed. Returning an error aborts
    /// without writing. When `f` leaves the record unchanged nothing is written.
    pub fn modify<F>(&self, tenant: &Tenant, key: &str, mut f: F) -> Result<T, Error>
    where
        F: FnMut(&mut T) -> Result<(), Error>,
    {
        for _ in 0..MAX_MODIFY_ATTEMPTS {
            let doc = self
                .repo
                .get(tenant, T::COLLECTION, key)?
                .ok_or_else(|| Error::NotFound(format!("{} {}", T::COLLECTION, key)))?;

            let mut record: T = serde_json::from_value(doc.value.clone())?;
            f(&mut record)?;

            let value = serde_json::to_value(&record)?;
            if value == doc.value {
                return Ok(record);
            }

            match self
                .repo
                .update(tenant, T::COLLECTION, key, doc.revision, value)
            {
                Ok(_) => return Ok(record),
                Err(StoreError::Conflict { .. }) => {
                    log::debug!("write conflict on {} {}, retrying", T::COLLECTION, key);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        log::error!(
            "giving up on {} {} after {} conflicting writes",
            T::COLLECTION,
            key,
            MAX_MODIFY_ATTEMPTS
        );
        Err(Error::Internal(format!(
            "too much contention on {} {}",
            T::COLLECTION,
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Counter {
        name: String,
        hits: Vec<u32>,
    }

    impl Record for Counter {
        const COLLECTION: Collection = Collection::KeyCeremony;

        fn key(&self) -> String {
            self.name.clone()
        }
    }

    fn store() -> TypedStore<Counter> {
        TypedStore::new(Arc::new(MemRepository::new()))
    }

    #[test]
    fn require_reports_collection_and_key() {
        let tenant = Tenant::new("t").unwrap();
        let err = store().require(&tenant, "missing").unwrap_err();
        assert_eq!(err.to_string(), "ballotguard: not found: key_ceremony missing");
    }

    #[test]
    fn concurrent_modify_loses_no_update() {
        let tenant = Tenant::new("t").unwrap();
        let store = store();
        store
            .create(
                &tenant,
                &Counter {
                    name: "c".into(),
                    hits: vec![],
                },
            )
            .unwrap();

        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let store = store.clone();
                let tenant = tenant.clone();
                thread::spawn(move || {
                    for j in 0..10u32 {
                        store
                            .modify(&tenant, "c", |c| {
                                c.hits.push(i * 100 + j);
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let counter = store.require(&tenant, "c").unwrap();
        assert_eq!(counter.hits.len(), 40);
    }

    #[test]
    fn failed_modify_writes_nothing() {
        let tenant = Tenant::new("t").unwrap();
        let store = store();
        let original = Counter {
            name: "c".into(),
            hits: vec![1],
        };
        store.create(&tenant, &original).unwrap();

        let err = store
            .modify(&tenant, "c", |c| {
                c.hits.push(2);
                Err(Error::Forbidden("no".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(store.require(&tenant, "c").unwrap(), original);
    }
}
