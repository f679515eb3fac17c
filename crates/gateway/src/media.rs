use std::collections::{HashMap, VecDeque};

use waygate_common::MediaRef;

/// Bounded map of message id → media descriptor.
///
/// Populated when an inbound event references downloadable media, consulted
/// later by the on-demand download operation. Capacity-capped with
/// oldest-insertion eviction so a chatty tenant can't grow it without bound.
pub struct MediaRefCache {
    capacity: usize,
    entries: HashMap<String, MediaRef>,
    order: VecDeque<String>,
}

impl MediaRefCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, media: MediaRef) {
        let key = media.message_id.clone();
        if self.entries.insert(key.clone(), media).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn get(&self, message_id: &str) -> Option<MediaRef> {
        self.entries.get(message_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(id: &str) -> MediaRef {
        MediaRef {
            message_id: id.into(),
            direct_path: format!("/v/{id}"),
            media_key: "k".into(),
            mime_type: "image/jpeg".into(),
            byte_length: 10,
        }
    }

    #[test]
    fn stores_and_resolves_by_message_id() {
        let mut cache = MediaRefCache::new(4);
        cache.insert(media("m1"));
        assert_eq!(cache.get("m1").unwrap().direct_path, "/v/m1");
        assert!(cache.get("m2").is_none());
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut cache = MediaRefCache::new(3);
        for id in ["a", "b", "c", "d"] {
            cache.insert(media(id));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn reinsert_replaces_without_duplicate_order_entry() {
        let mut cache = MediaRefCache::new(2);
        cache.insert(media("a"));
        cache.insert(media("a"));
        cache.insert(media("b"));
        assert_eq!(cache.len(), 2);
        cache.insert(media("c"));
        // "a" was oldest despite the reinsert.
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }
}
