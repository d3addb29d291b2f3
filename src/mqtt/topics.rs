//! Ordered, duplicate-free list of topic names used for bulk subscription

/// Topics in first-insertion order, each present at most once.
///
/// Lookups are linear; the set is expected to stay small (a handful of
/// subscriptions per client) and only iterated when subscribing in bulk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<String>,
}

impl TopicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `topic` unless already present. Returns whether it was added.
    pub fn add(&mut self, topic: impl Into<String>) -> bool {
        let topic = topic.into();
        if self.contains(&topic) {
            return false;
        }
        self.topics.push(topic);
        true
    }

    pub fn extend<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for topic in topics {
            self.add(topic);
        }
    }

    /// Removes `topic` if present. Returns whether anything was removed.
    pub fn remove(&mut self, topic: &str) -> bool {
        match self.position(topic) {
            Some(index) => {
                self.topics.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_all<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.remove(topic.as_ref());
        }
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.position(topic).is_some()
    }

    fn position(&self, topic: &str) -> Option<usize> {
        self.topics.iter().position(|t| t == topic)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.topics.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TopicSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TopicSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a TopicSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_add_ignores_duplicates_and_keeps_order() {
        let set: TopicSet = ["a", "b", "a"].into_iter().collect();
        assert_eq!(set.as_slice(), ["a", "b"]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut set = TopicSet::new();
        assert!(set.add("sensors/temp"));
        assert!(!set.add("sensors/temp"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_non_member_is_noop() {
        let mut set: TopicSet = ["a", "b"].into_iter().collect();
        let before = set.clone();
        assert!(!set.remove("z"));
        assert_eq!(set, before);
    }

    #[test]
    fn test_remove_keeps_remaining_order() {
        let mut set: TopicSet = ["a", "b", "c", "d"].into_iter().collect();
        set.remove_all(["b", "d", "x"]);
        assert_eq!(set.as_slice(), ["a", "c"]);
    }

    #[test]
    fn test_clear_empties() {
        let mut set: TopicSet = ["a", "b"].into_iter().collect();
        set.clear();
        assert!(set.is_empty());
        set.clear();
        assert!(set.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Delete(String),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let name = "[a-e]";
        prop_oneof![
            name.prop_map(Op::Add),
            name.prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_first_insertion_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut set = TopicSet::new();
            let mut model: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    Op::Add(name) => {
                        set.add(name.clone());
                        if !model.contains(&name) {
                            model.push(name);
                        }
                    }
                    Op::Delete(name) => {
                        set.remove(&name);
                        model.retain(|t| t != &name);
                    }
                }
            }

            prop_assert_eq!(set.as_slice(), model.as_slice());
            let mut deduped = model.clone();
            deduped.sort();
            deduped.dedup();
            prop_assert_eq!(deduped.len(), set.len());
        }
    }
}
