//! Topic filter trie
//!
//! Subscriptions are stored in a tree with one node per filter level. A node's
//! children are keyed by segment, and the wildcard segments `+` and `#` are
//! ordinary keys. Published topic levels can never be `+` or `#`, so a literal
//! lookup never lands on a wildcard child by accident.
//!
//! Matching walks every branch that can still succeed at each level: the
//! literal child, the `+` child and the `#` child. A topic with N levels can
//! therefore be resolved through several paths at once.
//!
//! Concurrency note: the trie itself is plain data. The broker keeps it
//! behind a `RwLock` so a `subscribe` can never be observed half-linked by a
//! concurrent `matches`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::broker::message::QoS;
use crate::utils::BrokerError;

pub type SubscriberId = String;

pub const LEVEL_SEPARATOR: char = '/';
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Check a subscription filter against the filter grammar.
///
/// - non-empty, no NUL characters
/// - `+` only as the whole content of a level
/// - `#` only as the whole content of the last level
pub fn validate_filter(filter: &str) -> Result<(), BrokerError> {
    if filter.is_empty() || filter.contains('\0') {
        return Err(BrokerError::InvalidFilter(filter.to_string()));
    }

    let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
    let last = levels.len() - 1;

    for (i, level) in levels.iter().enumerate() {
        let wildcard_misuse = match *level {
            SINGLE_LEVEL_WILDCARD => false,
            MULTI_LEVEL_WILDCARD => i != last,
            other => other.contains(['+', '#']),
        };
        if wildcard_misuse {
            return Err(BrokerError::InvalidFilter(filter.to_string()));
        }
    }

    Ok(())
}

/// Check a published topic name: non-empty, no NUL, no wildcard characters.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() || topic.contains(['\0', '+', '#']) {
        return Err(BrokerError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Decode raw filter bytes and validate them.
pub fn parse_filter(filter: &[u8]) -> Result<&str, BrokerError> {
    let filter = std::str::from_utf8(filter)
        .map_err(|_| BrokerError::InvalidFilter(String::from_utf8_lossy(filter).into_owned()))?;
    validate_filter(filter)?;
    Ok(filter)
}

/// Decode raw topic bytes and validate them.
pub fn parse_topic(topic: &[u8]) -> Result<&str, BrokerError> {
    let topic = std::str::from_utf8(topic)
        .map_err(|_| BrokerError::InvalidTopic(String::from_utf8_lossy(topic).into_owned()))?;
    validate_topic(topic)?;
    Ok(topic)
}

/// One level of a subscription filter.
#[derive(Debug, Default)]
pub struct TopicLevelNode {
    pub segment: String,
    pub children: HashMap<String, TopicLevelNode>,
    pub subscriptions: HashMap<SubscriberId, QoS>,
}

impl TopicLevelNode {
    pub fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            children: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.subscriptions.is_empty()
    }

    fn collect_into(&self, out: &mut HashMap<SubscriberId, QoS>) {
        for (client, qos) in &self.subscriptions {
            out.entry(client.clone())
                .and_modify(|best| *best = (*best).max(*qos))
                .or_insert(*qos);
        }
    }

    fn match_levels(&self, levels: &[&str], out: &mut HashMap<SubscriberId, QoS>) {
        // `#` covers the rest of the topic, including nothing at all.
        if let Some(hash) = self.children.get(MULTI_LEVEL_WILDCARD) {
            hash.collect_into(out);
        }

        let Some((head, tail)) = levels.split_first() else {
            self.collect_into(out);
            return;
        };

        if let Some(exact) = self.children.get(*head) {
            exact.match_levels(tail, out);
        }
        if let Some(plus) = self.children.get(SINGLE_LEVEL_WILDCARD) {
            plus.match_levels(tail, out);
        }
    }

    /// Returns `(removed, prune)`; `prune` tells the parent this node can go.
    fn remove_path(&mut self, levels: &[&str], client: &str) -> (bool, bool) {
        let removed = match levels.split_first() {
            None => self.subscriptions.remove(client).is_some(),
            Some((head, tail)) => match self.children.entry((*head).to_string()) {
                Entry::Occupied(mut child) => {
                    let (removed, prune) = child.get_mut().remove_path(tail, client);
                    if prune {
                        child.remove();
                    }
                    removed
                }
                Entry::Vacant(_) => false,
            },
        };
        (removed, self.is_empty())
    }

    fn remove_everywhere(&mut self, client: &str) -> usize {
        let mut removed = usize::from(self.subscriptions.remove(client).is_some());
        self.children.retain(|_, child| {
            removed += child.remove_everywhere(client);
            !child.is_empty()
        });
        removed
    }

    fn holds(&self, client: &str) -> bool {
        self.subscriptions.contains_key(client)
            || self.children.values().any(|child| child.holds(client))
    }

    fn count(&self) -> usize {
        self.subscriptions.len() + self.children.values().map(Self::count).sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct TopicTrie {
    root: TopicLevelNode,
}

impl TopicTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `client` to `filter`. A repeated subscription to the same
    /// filter overwrites the stored QoS. Invalid filters leave the trie
    /// untouched.
    pub fn subscribe(&mut self, client: &str, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        validate_filter(filter)?;

        let mut node = &mut self.root;
        for level in filter.split(LEVEL_SEPARATOR) {
            node = node
                .children
                .entry(level.to_string())
                .or_insert_with(|| TopicLevelNode::new(level));
        }
        node.subscriptions.insert(client.to_string(), qos);
        Ok(())
    }

    /// Remove `client`'s subscription to exactly `filter`.
    ///
    /// Returns whether a subscription was removed. Nodes left without
    /// children or subscriptions are pruned.
    pub fn unsubscribe(&mut self, client: &str, filter: &str) -> Result<bool, BrokerError> {
        validate_filter(filter)?;
        let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
        let (removed, _) = self.root.remove_path(&levels, client);
        Ok(removed)
    }

    /// Drop every subscription held by `client`. Returns how many were removed.
    pub fn remove_client(&mut self, client: &str) -> usize {
        self.root.remove_everywhere(client)
    }

    /// Resolve a concrete topic to its subscribers.
    ///
    /// A client reached through several filters is reported once, at the
    /// highest QoS among them. Wildcard topics match nothing.
    pub fn matches(&self, topic: &str) -> Vec<(SubscriberId, QoS)> {
        if validate_topic(topic).is_err() {
            return Vec::new();
        }

        let levels: Vec<&str> = topic.split(LEVEL_SEPARATOR).collect();
        let mut out = HashMap::new();
        self.root.match_levels(&levels, &mut out);
        out.into_iter().collect()
    }

    /// Whether `client` holds at least one subscription.
    pub fn has_client(&self, client: &str) -> bool {
        self.root.holds(client)
    }

    pub fn subscription_count(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
