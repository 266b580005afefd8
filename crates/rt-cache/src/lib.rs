//! Per-record field state, dirty-field tracking, and conflated delivery
//! (§3.3, §3.4, §4.7).
//!
//! A [`Record`] owns every field the peer has ever sent for one
//! (service, ticker); [`RecordCache`] is the (stream id / service+ticker) ->
//! `Record` lookup table a channel keeps on its own thread. Values handed
//! out by `image()`/`drain_dirty()` are owned copies — the §4.7 "borrowed
//! until the next mutation" contract is the caller's responsibility
//! (`rt-sub` never holds one across a callback boundary that could re-enter
//! the cache).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rt_protocol::{Field, WireValue};
use rt_schema::Schema;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no record for stream id {0}")]
    UnknownStreamId(u32),
    #[error("no record for ({0}, {1})")]
    UnknownRecord(String, String),
}

struct FieldSlot {
    value: WireValue,
    updated_at: Instant,
}

/// Per-(service,ticker) field state (§3.3).
pub struct Record {
    pub service: String,
    pub ticker: String,
    pub stream_id: Option<u32>,
    refcount: u32,
    fields: HashMap<u16, FieldSlot>,
    dirty_order: Vec<u16>,
    dirty_set: HashSet<u16>,
    num_images: u64,
    num_updates: u64,
    last_update_at: Option<Instant>,
    queued: bool,
}

impl Record {
    pub fn new(service: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ticker: ticker.into(),
            stream_id: None,
            refcount: 0,
            fields: HashMap::new(),
            dirty_order: Vec::new(),
            dirty_set: HashSet::new(),
            num_images: 0,
            num_updates: 0,
            last_update_at: None,
            queued: false,
        }
    }

    pub fn inc_ref(&mut self) {
        self.refcount += 1;
    }

    /// Decrement the reference count, returning the count after
    /// decrementing. The caller (`rt-sub`) evicts the record once this
    /// reaches zero (§3.3 lifecycle).
    pub fn dec_ref(&mut self) -> u32 {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn num_images(&self) -> u64 {
        self.num_images
    }

    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Mark the record queued for delivery; returns `true` only if this
    /// call transitioned it from not-queued, so the caller enqueues at
    /// most once per drain (§4.7 conflation contract).
    pub fn mark_queued(&mut self) -> bool {
        if self.queued {
            false
        } else {
            self.queued = true;
            true
        }
    }

    pub fn clear_queued(&mut self) {
        self.queued = false;
    }

    /// Merge `fields` into this record's state. On the very first call this
    /// is effectively an initialization (every field is unobserved, hence
    /// dirty). An image resets the update counter per §3.3 ("image...
    /// resets the record's counters"); updates increment it.
    ///
    /// Fixed-size values compare by value; string/byte-stream by
    /// length+bytes; vectors element-wise with precision tolerance — all
    /// via [`Field::value_eq`].
    pub fn apply(&mut self, fields: &[Field], is_image: bool) {
        let now = Instant::now();
        if is_image {
            self.num_images += 1;
            self.num_updates = 0;
        } else {
            self.num_updates += 1;
        }
        self.last_update_at = Some(now);
        for field in fields {
            let changed = match self.fields.get(&field.id) {
                None => true,
                Some(slot) => !Field::value_eq(&slot.value, &field.value),
            };
            self.fields.insert(field.id, FieldSlot { value: field.value.clone(), updated_at: now });
            if changed && !self.dirty_set.contains(&field.id) {
                self.dirty_set.insert(field.id);
                self.dirty_order.push(field.id);
            }
        }
    }

    /// Drain the dirty list accumulated since the last drain, in the order
    /// fields were first dirtied, then clear it (§4.7).
    pub fn drain_dirty(&mut self) -> Vec<Field> {
        let ids = std::mem::take(&mut self.dirty_order);
        self.dirty_set.clear();
        ids.into_iter()
            .filter_map(|id| self.fields.get(&id).map(|slot| Field::new(id, slot.value.clone())))
            .collect()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty_order.is_empty()
    }

    /// The full current field map, in schema id order; fields with no
    /// schema entry are appended afterward in ascending id order.
    pub fn image(&self, schema: &Schema) -> Vec<Field> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.fields.len());
        for def in schema.iter_by_id() {
            if let Some(slot) = self.fields.get(&def.id) {
                out.push(Field::new(def.id, slot.value.clone()));
                seen.insert(def.id);
            }
        }
        let mut leftover: Vec<u16> = self.fields.keys().copied().filter(|id| !seen.contains(id)).collect();
        leftover.sort_unstable();
        for id in leftover {
            out.push(Field::new(id, self.fields[&id].value.clone()));
        }
        out
    }

    pub fn field(&self, id: u16) -> Option<Field> {
        self.fields.get(&id).map(|slot| Field::new(id, slot.value.clone()))
    }
}

/// The (stream id / (service,ticker)) -> [`Record`] table a channel owns
/// (§4.7). Mutated only on the owning channel's thread; a pull consumer
/// reading from another thread does so through a mutex the channel crate
/// (`rt-sub`) wraps around this.
#[derive(Default)]
pub struct RecordCache {
    by_key: HashMap<(String, String), Record>,
    by_stream: HashMap<u32, (String, String)>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, service: &str, ticker: &str) -> &mut Record {
        self.by_key
            .entry((service.to_owned(), ticker.to_owned()))
            .or_insert_with(|| Record::new(service, ticker))
    }

    pub fn get(&self, service: &str, ticker: &str) -> Option<&Record> {
        self.by_key.get(&(service.to_owned(), ticker.to_owned()))
    }

    pub fn get_mut(&mut self, service: &str, ticker: &str) -> Option<&mut Record> {
        self.by_key.get_mut(&(service.to_owned(), ticker.to_owned()))
    }

    pub fn by_stream_id(&self, stream_id: u32) -> Option<&Record> {
        self.by_stream.get(&stream_id).and_then(|key| self.by_key.get(key))
    }

    pub fn by_stream_id_mut(&mut self, stream_id: u32) -> Option<&mut Record> {
        let key = self.by_stream.get(&stream_id)?.clone();
        self.by_key.get_mut(&key)
    }

    /// Record the peer-assigned stream id for (service,ticker), assigned on
    /// first image (§3.3).
    pub fn assign_stream_id(&mut self, service: &str, ticker: &str, stream_id: u32) {
        self.by_stream.insert(stream_id, (service.to_owned(), ticker.to_owned()));
        if let Some(rec) = self.get_mut(service, ticker) {
            rec.stream_id = Some(stream_id);
        }
    }

    /// Evict (service,ticker) if its refcount has reached zero. Returns
    /// `true` if the record was removed.
    pub fn evict_if_unreferenced(&mut self, service: &str, ticker: &str) -> bool {
        let key = (service.to_owned(), ticker.to_owned());
        let should_remove = matches!(self.by_key.get(&key), Some(r) if r.refcount() == 0);
        if should_remove {
            if let Some(rec) = self.by_key.remove(&key) {
                if let Some(stream_id) = rec.stream_id {
                    self.by_stream.remove(&stream_id);
                }
            }
        }
        should_remove
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.by_key.values()
    }
}
