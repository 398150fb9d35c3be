use ahash::AHashSet;

use super::CacheKey;

/// Keys known to reference one physical value.
///
/// The group is disposed only once every member has voted, and is spilled
/// if any member voted to spill.
#[derive(Debug, Clone)]
pub(crate) struct AliasGroup {
    head: CacheKey,
    members: Vec<CacheKey>,
    undecided: AHashSet<CacheKey>,
    spill_votes: usize,
}

impl AliasGroup {
    pub(crate) fn new(head: CacheKey) -> Self {
        let mut group = Self {
            head: head.clone(),
            members: Vec::new(),
            undecided: AHashSet::new(),
            spill_votes: 0,
        };
        group.add_member(head);
        group
    }

    pub(crate) fn add_member(&mut self, key: CacheKey) {
        if self.members.contains(&key) {
            return;
        }
        self.undecided.insert(key.clone());
        self.members.push(key);
    }

    /// Records a member's vote. Returns `true` once every member has voted.
    pub(crate) fn mark(&mut self, key: &CacheKey, spill: bool) -> bool {
        if self.undecided.remove(key) && spill {
            self.spill_votes += 1;
        }
        self.undecided.is_empty()
    }

    pub(crate) fn is_partially_decided(&self) -> bool {
        !self.undecided.is_empty() && self.undecided.len() < self.members.len()
    }

    pub(crate) fn wants_spill(&self) -> bool {
        self.spill_votes > 0
    }

    /// Forgets all votes, e.g. after the group was spilled or rolled back.
    pub(crate) fn reset_votes(&mut self) {
        self.undecided = self.members.iter().cloned().collect();
        self.spill_votes = 0;
    }

    pub(crate) fn head(&self) -> &CacheKey {
        &self.head
    }

    pub(crate) fn members(&self) -> &[CacheKey] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decided_only_after_every_member_votes() {
        let (a, b, c) = (
            CacheKey::new(1, "op"),
            CacheKey::new(2, "op"),
            CacheKey::new(3, "op"),
        );
        let mut group = AliasGroup::new(a.clone());
        group.add_member(b.clone());
        group.add_member(c.clone());
        group.add_member(b.clone());
        assert_eq!(group.members().len(), 3);

        assert!(!group.mark(&a, false));
        assert!(group.is_partially_decided());
        assert!(!group.mark(&a, true));
        assert!(!group.wants_spill());
        assert!(!group.mark(&b, true));
        assert!(group.mark(&c, false));
        assert!(group.wants_spill());
        assert!(!group.is_partially_decided());

        group.reset_votes();
        assert!(!group.wants_spill());
        assert!(!group.is_partially_decided());
        assert_eq!(group.head(), &a);
    }
}
