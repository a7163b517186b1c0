//! Topic router: the subscription set and the index derived from it.
//!
//! # Two structures, one source of truth
//!
//! The **subscription set** (`ConnectionId → {TopicPattern}`) is the only
//! authoritative state.  The **routing index** is derived from it so that a
//! topic can be resolved without scanning every pattern:
//!
//! ```text
//! exact:  "line1.temp" → {D}
//! prefix: "line1"      → {D, V}      (from "line1.*")
//!         ""           → {LOG}       (from "*")
//! ```
//!
//! Resolving `line1.temp` looks up the exact key, the `""` key and every
//! proper prefix of the topic (`line1`).  That is O(segments + matches)
//! regardless of how many subscriptions exist.
//!
//! Because the index is derived, it can always be thrown away and rebuilt
//! with [`TopicRouter::rebuild`].  The dispatch engine does exactly that when
//! [`TopicRouter::match_subscribers`] reports [`RoutingError::Corruption`].

use std::collections::{BTreeMap, HashMap, HashSet};

use lf_core::{ConnectionId, Topic, TopicPattern};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Errors raised by [`TopicRouter`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The index named a subscriber that holds no matching subscription.
    #[error("routing index names {connection} for '{topic}' without a matching subscription")]
    Corruption {
        topic: String,
        connection: ConnectionId,
    },

    /// The index differs from a fresh rebuild of the subscription set.
    #[error("routing index diverged from subscriptions ({stale} stale, {missing} missing entries)")]
    Diverged { stale: usize, missing: usize },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct RoutingIndex {
    exact: HashMap<String, HashSet<ConnectionId>>,
    /// Keyed by the literal prefix of a wildcard pattern; `""` is `*`.
    prefix: HashMap<String, HashSet<ConnectionId>>,
}

impl RoutingIndex {
    fn from_subscriptions(subscriptions: &HashMap<ConnectionId, HashSet<TopicPattern>>) -> Self {
        let mut index = Self::default();
        for (id, patterns) in subscriptions {
            for pattern in patterns {
                index.insert(*id, pattern);
            }
        }
        index
    }

    fn slot(&mut self, pattern: &TopicPattern) -> (&mut HashMap<String, HashSet<ConnectionId>>, String) {
        match pattern.wildcard_prefix() {
            Some(prefix) => (&mut self.prefix, prefix.to_string()),
            None => (&mut self.exact, pattern.as_str().to_string()),
        }
    }

    fn insert(&mut self, id: ConnectionId, pattern: &TopicPattern) {
        let (map, key) = self.slot(pattern);
        map.entry(key).or_default().insert(id);
    }

    fn remove(&mut self, id: ConnectionId, pattern: &TopicPattern) {
        let (map, key) = self.slot(pattern);
        if let Some(ids) = map.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                map.remove(&key);
            }
        }
    }

    /// Counts `(key, id)` pairs present here but not in `fresh`.
    fn surplus_over(&self, fresh: &Self) -> usize {
        fn diff(
            a: &HashMap<String, HashSet<ConnectionId>>,
            b: &HashMap<String, HashSet<ConnectionId>>,
        ) -> usize {
            a.iter()
                .map(|(key, ids)| match b.get(key) {
                    Some(other) => ids.difference(other).count(),
                    None => ids.len(),
                })
                .sum()
        }
        diff(&self.exact, &fresh.exact) + diff(&self.prefix, &fresh.prefix)
    }
}

#[derive(Default)]
struct RouterInner {
    subscriptions: HashMap<ConnectionId, HashSet<TopicPattern>>,
    index: RoutingIndex,
}

impl RouterInner {
    /// The id's subscriptions must include one that selects `topic`.
    fn verify(&self, topic: &Topic, id: ConnectionId) -> Result<(), RoutingError> {
        let backed = self
            .subscriptions
            .get(&id)
            .is_some_and(|patterns| patterns.iter().any(|p| p.matches(topic)));
        if backed {
            Ok(())
        } else {
            Err(RoutingError::Corruption {
                topic: topic.to_string(),
                connection: id,
            })
        }
    }
}

/// Subscription store with a derived topic → subscriber index.
#[derive(Default)]
pub struct TopicRouter {
    inner: RwLock<RouterInner>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription.  Returns `false` if it was already held.
    pub async fn subscribe(&self, id: ConnectionId, pattern: TopicPattern) -> bool {
        let mut inner = self.inner.write().await;
        let added = inner.subscriptions.entry(id).or_default().insert(pattern.clone());
        if added {
            inner.index.insert(id, &pattern);
            debug!(connection = %id, %pattern, "subscribed");
        }
        added
    }

    /// Drops a subscription.  Returns `false` (and does nothing) if it was
    /// not held.
    pub async fn unsubscribe(&self, id: ConnectionId, pattern: &TopicPattern) -> bool {
        let mut inner = self.inner.write().await;
        let Some(patterns) = inner.subscriptions.get_mut(&id) else {
            return false;
        };
        if !patterns.remove(pattern) {
            return false;
        }
        if patterns.is_empty() {
            inner.subscriptions.remove(&id);
        }
        inner.index.remove(id, pattern);
        debug!(connection = %id, %pattern, "unsubscribed");
        true
    }

    /// Drops every subscription held by `id`, returning how many there were.
    pub async fn remove_connection(&self, id: ConnectionId) -> usize {
        let mut inner = self.inner.write().await;
        let Some(patterns) = inner.subscriptions.remove(&id) else {
            return 0;
        };
        for pattern in &patterns {
            inner.index.remove(id, pattern);
        }
        patterns.len()
    }

    /// Resolves the set of connections subscribed to `topic`.
    ///
    /// Each connection appears at most once however many of its patterns
    /// match.
    ///
    /// # Errors
    ///
    /// [`RoutingError::Corruption`] if the index names a connection whose
    /// subscriptions do not select `topic`.
    pub async fn match_subscribers(&self, topic: &Topic) -> Result<HashSet<ConnectionId>, RoutingError> {
        let inner = self.inner.read().await;
        let mut matched = HashSet::new();

        let exact = inner.index.exact.get(topic.as_str());
        let wildcard = std::iter::once("")
            .chain(topic.proper_prefixes())
            .filter_map(|prefix| inner.index.prefix.get(prefix));

        for ids in exact.into_iter().chain(wildcard) {
            for &id in ids {
                if matched.contains(&id) {
                    continue;
                }
                inner.verify(topic, id)?;
                matched.insert(id);
            }
        }
        Ok(matched)
    }

    /// Discards the index and derives it again from the subscription set.
    pub async fn rebuild(&self) {
        let mut inner = self.inner.write().await;
        let fresh = RoutingIndex::from_subscriptions(&inner.subscriptions);
        let stale = inner.index.surplus_over(&fresh);
        let missing = fresh.surplus_over(&inner.index);
        inner.index = fresh;
        info!(stale, missing, "routing index rebuilt");
    }

    /// Compares the live index with a fresh rebuild.
    ///
    /// # Errors
    ///
    /// [`RoutingError::Diverged`] if the two differ.
    pub async fn check_consistency(&self) -> Result<(), RoutingError> {
        let inner = self.inner.read().await;
        let fresh = RoutingIndex::from_subscriptions(&inner.subscriptions);
        if inner.index == fresh {
            return Ok(());
        }
        Err(RoutingError::Diverged {
            stale: inner.index.surplus_over(&fresh),
            missing: fresh.surplus_over(&inner.index),
        })
    }

    /// Number of connections holding each pattern.
    pub async fn subscription_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.read().await;
        let mut counts = BTreeMap::new();
        for pattern in inner.subscriptions.values().flatten() {
            *counts.entry(pattern.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// The patterns held by `id`, sorted.
    pub async fn patterns_for(&self, id: ConnectionId) -> Vec<TopicPattern> {
        let inner = self.inner.read().await;
        let mut patterns: Vec<TopicPattern> = inner
            .subscriptions
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        patterns.sort();
        patterns
    }

    /// Plants an index entry with no backing subscription.
    #[cfg(test)]
    pub(crate) async fn inject_stale_entry(&self, pattern: &TopicPattern, id: ConnectionId) {
        self.inner.write().await.index.insert(id, pattern);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
