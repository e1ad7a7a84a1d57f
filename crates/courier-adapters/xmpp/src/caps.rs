//! Entity-capabilities cache.
//!
//! Presence advertises a `node#ver` hash; the first requester for a given
//! hash triggers one disco#info query and everyone asking while it is in
//! flight is parked until it resolves.

use std::collections::HashMap;
use std::sync::Arc;

use crate::stanza::DiscoInfo;

#[derive(Debug)]
enum Entry<R> {
    Pending(Vec<R>),
    Known(Arc<DiscoInfo>),
}

/// Outcome of [`CapsCache::request`].
#[derive(Debug)]
pub enum Lookup<R> {
    /// Already known; the requester is handed back to be answered directly.
    Hit(Arc<DiscoInfo>, R),
    /// Not known yet. `first` is set when the caller must send the query.
    Miss { first: bool },
}

#[derive(Debug)]
pub struct CapsCache<R> {
    entries: HashMap<String, Entry<R>>,
}

impl<R> Default for CapsCache<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R> CapsCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, key: &str, requester: R) -> Lookup<R> {
        match self.entries.get_mut(key) {
            Some(Entry::Known(info)) => Lookup::Hit(info.clone(), requester),
            Some(Entry::Pending(waiting)) => {
                waiting.push(requester);
                Lookup::Miss { first: false }
            }
            None => {
                self.entries
                    .insert(key.to_string(), Entry::Pending(vec![requester]));
                Lookup::Miss { first: true }
            }
        }
    }

    /// Stores the answer and hands back everyone who was waiting for it.
    pub fn resolve(&mut self, key: &str, info: DiscoInfo) -> (Arc<DiscoInfo>, Vec<R>) {
        let info = Arc::new(info);
        let waiting = match self
            .entries
            .insert(key.to_string(), Entry::Known(info.clone()))
        {
            Some(Entry::Pending(waiting)) => waiting,
            _ => Vec::new(),
        };
        (info, waiting)
    }

    /// Forgets a failed query so the next request retries it.
    pub fn fail(&mut self, key: &str) -> Vec<R> {
        match self.entries.remove(key) {
            Some(Entry::Pending(waiting)) => waiting,
            Some(known @ Entry::Known(_)) => {
                self.entries.insert(key.to_string(), known);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<DiscoInfo>> {
        match self.entries.get(key) {
            Some(Entry::Known(info)) => Some(info.clone()),
            _ => None,
        }
    }
}
