// src/store/memory.rs
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::{CheckpointStore, IngestStore, ItemFilter, ItemStore, SourceRegistry, StoreError};
use crate::model::{Checkpoint, Item, Source, SourceId, Translation};

/// Checkpoints kept per source; older ones are dropped.
const CHECKPOINT_HISTORY: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    sources: BTreeMap<SourceId, Source>,
    /// Keyed by guid, which is unique across all sources.
    #[serde(default)]
    items: BTreeMap<String, Item>,
    /// Oldest first.
    #[serde(default)]
    checkpoints: BTreeMap<SourceId, Vec<Checkpoint>>,
}

/// Prior value of one touched record.
enum Undo {
    Source(SourceId, Option<Source>),
    Item(String, Option<Item>),
    Checkpoints(SourceId, Option<Vec<Checkpoint>>),
}

/// In-place mutation of the state that remembers what it touched.
struct Tx<'a> {
    st: &'a mut StoreState,
    undo: Vec<Undo>,
}

impl Tx<'_> {
    fn source(&self, id: SourceId) -> Option<&Source> {
        self.st.sources.get(&id)
    }

    fn put_source(&mut self, source: &Source) {
        let prev = self.st.sources.insert(source.id, source.clone());
        self.undo.push(Undo::Source(source.id, prev));
    }

    fn insert_item(&mut self, item: &Item) -> Result<(), StoreError> {
        if self.st.items.contains_key(&item.guid) {
            return Err(StoreError::DuplicateGuid(item.guid.clone()));
        }
        self.st.items.insert(item.guid.clone(), item.clone());
        self.undo.push(Undo::Item(item.guid.clone(), None));
        Ok(())
    }

    fn item_mut(&mut self, guid: &str) -> Option<&mut Item> {
        let prev = self.st.items.get(guid)?.clone();
        self.undo.push(Undo::Item(guid.to_string(), Some(prev)));
        self.st.items.get_mut(guid)
    }

    fn put_checkpoint(&mut self, cp: &Checkpoint) {
        let prev = self.st.checkpoints.get(&cp.source_id).cloned();
        self.undo.push(Undo::Checkpoints(cp.source_id, prev));

        let list = self.st.checkpoints.entry(cp.source_id).or_default();
        match list.iter_mut().find(|c| c.created_at == cp.created_at) {
            Some(slot) => *slot = cp.clone(),
            None => {
                list.push(cp.clone());
                if list.len() > CHECKPOINT_HISTORY {
                    let excess = list.len() - CHECKPOINT_HISTORY;
                    list.drain(..excess);
                }
            }
        }
    }
}

fn rollback(st: &mut StoreState, undo: Vec<Undo>) {
    for u in undo.into_iter().rev() {
        match u {
            Undo::Source(id, Some(s)) => {
                st.sources.insert(id, s);
            }
            Undo::Source(id, None) => {
                st.sources.remove(&id);
            }
            Undo::Item(guid, Some(it)) => {
                st.items.insert(guid, it);
            }
            Undo::Item(guid, None) => {
                st.items.remove(&guid);
            }
            Undo::Checkpoints(id, Some(list)) => {
                st.checkpoints.insert(id, list);
            }
            Undo::Checkpoints(id, None) => {
                st.checkpoints.remove(&id);
            }
        }
    }
}

/// All records behind one mutex, optionally mirrored to a JSON snapshot.
///
/// A mutation edits only the records it touches and keeps their previous
/// values; a failed mutation or a failed snapshot write restores them.
/// Snapshot writes go through `tokio::fs` (temp file + rename) outside the
/// state lock, one writer at a time. Readers may see a commit shortly
/// before its snapshot lands.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    /// Serializes mutations together with their snapshot write.
    writer: tokio::sync::Mutex<()>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or start) a snapshot-backed store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let st: StoreState = serde_json::from_str(&raw)?;
            info!(
                target: "store",
                path = %path.display(),
                sources = st.sources.len(),
                items = st.items.len(),
                "loaded store snapshot"
            );
            st
        } else {
            StoreState::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            writer: tokio::sync::Mutex::new(()),
            snapshot: Some(path),
        })
    }

    /// Register sources that are not yet known; existing ones are left alone.
    /// Startup only: writes the snapshot synchronously.
    pub fn seed_sources(&self, sources: &[Source]) -> Result<usize, StoreError> {
        let (added, undo, bytes) = self.apply(|tx| {
            let mut added = 0;
            for s in sources {
                if tx.source(s.id).is_none() {
                    tx.put_source(s);
                    added += 1;
                }
            }
            Ok(added)
        })?;
        if let (Some(path), Some(bytes)) = (&self.snapshot, bytes) {
            if let Err(e) = write_atomic(path, &bytes) {
                rollback(&mut self.lock(), undo);
                return Err(e);
            }
        }
        Ok(added)
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Failed mutations are rolled back, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the live state. On error its edits are undone; on
    /// success returns the undo log and, with a snapshot path, the encoded state.
    fn apply<T>(
        &self,
        f: impl FnOnce(&mut Tx<'_>) -> Result<T, StoreError>,
    ) -> Result<(T, Vec<Undo>, Option<Vec<u8>>), StoreError> {
        let mut guard = self.lock();
        let mut tx = Tx {
            st: &mut *guard,
            undo: Vec::new(),
        };
        let res = f(&mut tx);
        let Tx { undo, .. } = tx;
        let out = match res {
            Ok(out) => out,
            Err(e) => {
                rollback(&mut *guard, undo);
                return Err(e);
            }
        };
        if undo.is_empty() || self.snapshot.is_none() {
            return Ok((out, undo, None));
        }
        match serde_json::to_vec(&*guard) {
            Ok(bytes) => Ok((out, undo, Some(bytes))),
            Err(e) => {
                rollback(&mut *guard, undo);
                Err(e.into())
            }
        }
    }

    async fn mutate<T: Send>(
        &self,
        f: impl FnOnce(&mut Tx<'_>) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().await;
        let (out, undo, bytes) = self.apply(f)?;
        if let (Some(path), Some(bytes)) = (&self.snapshot, bytes) {
            if let Err(e) = write_snapshot(path, &bytes).await {
                warn!(target: "store", path = %path.display(), error = %e, "snapshot write failed, rolling back");
                rollback(&mut self.lock(), undo);
                return Err(e);
            }
        }
        Ok(out)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

async fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(bytes).await?;
    f.sync_all().await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SourceRegistry for MemoryStore {
    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, StoreError> {
        Ok(self.lock().sources.get(&id).cloned())
    }

    async fn save_source(&self, source: &Source) -> Result<(), StoreError> {
        self.mutate(|tx| {
            tx.put_source(source);
            Ok(())
        })
        .await
    }

    async fn active_sources(&self) -> Result<Vec<Source>, StoreError> {
        Ok(self
            .lock()
            .sources
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn find_by_guid(&self, guid: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.lock().items.get(guid).cloned())
    }

    async fn save_item(&self, item: &Item) -> Result<(), StoreError> {
        self.mutate(|tx| tx.insert_item(item)).await
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<(Vec<Item>, usize), StoreError> {
        let st = self.lock();
        let mut hits: Vec<&Item> = st.items.values().filter(|it| filter.matches(it)).collect();
        hits.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.guid.cmp(&b.guid))
        });
        let total = hits.len();
        let limit = filter.limit();
        let page = hits
            .into_iter()
            .skip((filter.page() - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn set_read(&self, guid: &str, read: bool) -> Result<bool, StoreError> {
        self.mutate(|tx| match tx.item_mut(guid) {
            Some(it) => {
                it.is_read = read;
                Ok(true)
            }
            None => Ok(false),
        })
        .await
    }

    async fn toggle_favorite(&self, guid: &str) -> Result<Option<bool>, StoreError> {
        self.mutate(|tx| {
            Ok(tx.item_mut(guid).map(|it| {
                it.is_favorite = !it.is_favorite;
                it.is_favorite
            }))
        })
        .await
    }

    async fn put_translations(
        &self,
        guid: &str,
        entries: &BTreeMap<String, Translation>,
    ) -> Result<Option<Item>, StoreError> {
        self.mutate(|tx| {
            Ok(tx.item_mut(guid).map(|it| {
                for (lang, t) in entries {
                    it.translations.insert(lang.clone(), t.clone());
                }
                it.clone()
            }))
        })
        .await
    }

    async fn clear_translations(
        &self,
        guid: &str,
        lang: Option<&str>,
    ) -> Result<Option<usize>, StoreError> {
        self.mutate(|tx| {
            Ok(tx.item_mut(guid).map(|it| match lang {
                Some(l) => usize::from(it.translations.remove(l).is_some()),
                None => {
                    let n = it.translations.len();
                    it.translations.clear();
                    n
                }
            }))
        })
        .await
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn active_checkpoint(
        &self,
        source_id: SourceId,
    ) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .lock()
            .checkpoints
            .get(&source_id)
            .and_then(|l| l.last())
            .filter(|c| !c.is_completed)
            .cloned())
    }

    async fn latest_checkpoint(
        &self,
        source_id: SourceId,
    ) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .lock()
            .checkpoints
            .get(&source_id)
            .and_then(|l| l.last())
            .cloned())
    }

    async fn save_checkpoint(&self, cp: &Checkpoint) -> Result<(), StoreError> {
        self.mutate(|tx| {
            tx.put_checkpoint(cp);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn commit_item(&self, item: Option<&Item>, cp: &Checkpoint) -> Result<(), StoreError> {
        self.mutate(|tx| {
            if let Some(item) = item {
                tx.insert_item(item)?;
            }
            tx.put_checkpoint(cp);
            Ok(())
        })
        .await
    }

    async fn commit_cycle(&self, cp: &Checkpoint, source: &Source) -> Result<(), StoreError> {
        self.mutate(|tx| {
            if tx.source(source.id).is_none() {
                return Err(StoreError::UnknownSource(source.id));
            }
            tx.put_checkpoint(cp);
            tx.put_source(source);
            Ok(())
        })
        .await
    }
}
