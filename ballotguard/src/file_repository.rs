use crate::repository::{find_in, insert_in, update_in, upsert_in, Documents};
use crate::*;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A repository that keeps one JSON file per collection under
/// `<root>/<tenant>/<collection>.json`.
///
/// Each write rewrites the whole collection through a temporary file and a
/// rename, so a crash leaves either the old or the new file. Writers are
/// serialized by a process-local lock; the directory must not be shared
/// between processes.
pub struct FileRepository {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileRepository {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FileRepository {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, tenant: &Tenant, collection: Collection) -> PathBuf {
        self.root
            .join(tenant.as_str())
            .join(format!("{}.json", collection.name()))
    }

    fn load(&self, tenant: &Tenant, collection: Collection) -> Result<Documents, StoreError> {
        let path = self.path(tenant, collection);
        if !path.exists() {
            return Ok(Documents::new());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(
        &self,
        tenant: &Tenant,
        collection: Collection,
        documents: &Documents,
    ) -> Result<(), StoreError> {
        let path = self.path(tenant, collection);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(documents)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn write_with<F>(&self, tenant: &Tenant, collection: Collection, f: F) -> Result<u64, StoreError>
    where
        F: FnOnce(&mut Documents) -> Result<u64, StoreError>,
    {
        let _guard = self.lock.lock();
        let mut documents = self.load(tenant, collection)?;
        let revision = f(&mut documents)?;
        self.save(tenant, collection, &documents)?;
        Ok(revision)
    }
}

impl Repository for FileRepository {
    fn get(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
    ) -> Result<Option<Versioned<Value>>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.load(tenant, collection)?.remove(key))
    }

    fn find(
        &self,
        tenant: &Tenant,
        collection: Collection,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let _guard = self.lock.lock();
        let documents = self.load(tenant, collection)?;
        Ok(find_in(&documents, filter, skip, limit))
    }

    fn set(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<u64, StoreError> {
        self.write_with(tenant, collection, |docs| {
            insert_in(docs, collection, key, value)
        })
    }

    fn update(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        expected_revision: u64,
        value: Value,
    ) -> Result<u64, StoreError> {
        self.write_with(tenant, collection, |docs| {
            update_in(docs, collection, key, expected_revision, value)
        })
    }

    fn upsert(
        &self,
        tenant: &Tenant,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<u64, StoreError> {
        self.write_with(tenant, collection, |docs| Ok(upsert_in(docs, key, value)))
    }
}
