//! Best common ancestor finder for three-way merges
//!
//! Merging needs the ancestor changeset both sides diverged from. The search runs in two phases:
//!
//! ### Phase 1: Find All Common Ancestors
//!
//! A bidirectional walk explores the history of both changesets at once, processing changesets
//! from the highest generation number down so that every changeset is handled after all of its
//! descendants. A changeset visited from both sides is a common ancestor; everything below it is
//! marked STALE and pruned.
//!
//! ### Phase 2: Filter to Best Common Ancestors
//!
//! A best common ancestor is a common ancestor that is not an ancestor of any other common
//! ancestor. Redundant candidates are dropped and one of the survivors is returned
//! deterministically (highest generation, then smallest id).
//!
//! Generation numbers (longest distance from a root changeset) are used as the walk priority
//! rather than timestamps, so histories recorded with identical or skewed clocks still merge
//! correctly.
//!
//! ## Debug Logging
//!
//! Build with `--features debug_merge` to print the walk on stderr.

use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;

/// Macro for debug logging that is enabled with the debug_merge feature flag
macro_rules! debug_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug_merge")]
        {
            eprintln!($($arg)*);
        }
    };
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct VisitState: u8 {
        const NONE = 0b00;
        const VISITED_FROM_SOURCE = 0b01;
        const VISITED_FROM_TARGET = 0b10;
        const VISITED_FROM_BOTH = Self::VISITED_FROM_SOURCE.bits() | Self::VISITED_FROM_TARGET.bits();
        const STALE = 0b100;
        const RESULT = 0b1000;
    }
}

impl fmt::Debug for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(VisitState::VISITED_FROM_SOURCE) {
            flags.push("SOURCE");
        }
        if self.contains(VisitState::VISITED_FROM_TARGET) {
            flags.push("TARGET");
        }
        if self.contains(VisitState::STALE) {
            flags.push("STALE");
        }
        if self.contains(VisitState::RESULT) {
            flags.push("RESULT");
        }
        if flags.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

/// Finds merge bases over a changeset graph described by a parent loader
///
/// # Type Parameters
///
/// * `ParentsLoaderFn` - returns the parent ids of a changeset (empty for a root changeset)
pub struct BcaFinder<ParentsLoaderFn>
where
    ParentsLoaderFn: Fn(&ObjectId) -> anyhow::Result<Vec<ObjectId>>,
{
    parents_loader: ParentsLoaderFn,
    parents: RefCell<HashMap<ObjectId, Vec<ObjectId>>>,
    generations: RefCell<HashMap<ObjectId, u64>>,
}

impl<ParentsLoaderFn> BcaFinder<ParentsLoaderFn>
where
    ParentsLoaderFn: Fn(&ObjectId) -> anyhow::Result<Vec<ObjectId>>,
{
    pub fn new(parents_loader: ParentsLoaderFn) -> Self {
        Self {
            parents_loader,
            parents: RefCell::new(HashMap::new()),
            generations: RefCell::new(HashMap::new()),
        }
    }

    fn parents_of(&self, oid: &ObjectId) -> anyhow::Result<Vec<ObjectId>> {
        if let Some(parents) = self.parents.borrow().get(oid) {
            return Ok(parents.clone());
        }

        let parents = (self.parents_loader)(oid)?;
        self.parents
            .borrow_mut()
            .insert(oid.clone(), parents.clone());
        Ok(parents)
    }

    fn generation(&self, oid: &ObjectId) -> anyhow::Result<u64> {
        let mut stack = vec![oid.clone()];

        while let Some(current) = stack.last().cloned() {
            if self.generations.borrow().contains_key(&current) {
                stack.pop();
                continue;
            }

            let parents = self.parents_of(&current)?;
            let pending = parents
                .iter()
                .filter(|parent| !self.generations.borrow().contains_key(*parent))
                .cloned()
                .collect::<Vec<_>>();

            if pending.is_empty() {
                let generation = parents
                    .iter()
                    .filter_map(|parent| self.generations.borrow().get(parent).copied())
                    .max()
                    .map_or(0, |max| max + 1);
                self.generations.borrow_mut().insert(current, generation);
                stack.pop();
            } else {
                stack.extend(pending);
            }
        }

        Ok(self.generations.borrow().get(oid).copied().unwrap_or_default())
    }

    fn find_common_ancestors(
        &self,
        source: &ObjectId,
        target: &ObjectId,
    ) -> anyhow::Result<HashSet<ObjectId>> {
        if source == target {
            return Ok(HashSet::from([source.clone()]));
        }

        let mut states = HashMap::<ObjectId, VisitState>::new();
        let mut queue = BinaryHeap::new();

        states.insert(source.clone(), VisitState::VISITED_FROM_SOURCE);
        queue.push((self.generation(source)?, source.clone()));
        states.insert(target.clone(), VisitState::VISITED_FROM_TARGET);
        queue.push((self.generation(target)?, target.clone()));

        while let Some((_, oid)) = queue.pop() {
            let state = states.get(&oid).copied().unwrap_or(VisitState::NONE);
            debug_log!("Processing changeset {}: state={:?}", &oid, state);

            let is_common = state.contains(VisitState::VISITED_FROM_BOTH)
                && !state.contains(VisitState::STALE);
            if is_common {
                states.insert(oid.clone(), state | VisitState::RESULT);
            }

            let mut inherited = state & (VisitState::VISITED_FROM_BOTH | VisitState::STALE);
            if is_common {
                inherited |= VisitState::STALE;
            }

            for parent in self.parents_of(&oid)? {
                let parent_state = states.get(&parent).copied().unwrap_or(VisitState::NONE);

                if !parent_state.contains(inherited) {
                    states.insert(parent.clone(), parent_state | inherited);
                    queue.push((self.generation(&parent)?, parent));
                }
            }
        }

        Ok(states
            .into_iter()
            .filter(|(_, state)| {
                state.contains(VisitState::RESULT) && !state.contains(VisitState::STALE)
            })
            .map(|(oid, _)| oid)
            .collect())
    }

    /// Whether `ancestor` is reachable from `descendant` through parent links
    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> anyhow::Result<bool> {
        let mut queue = VecDeque::from([descendant.clone()]);
        let mut seen = HashSet::new();

        while let Some(oid) = queue.pop_front() {
            if &oid == ancestor {
                return Ok(true);
            }
            if seen.insert(oid.clone()) {
                queue.extend(self.parents_of(&oid)?);
            }
        }

        Ok(false)
    }

    /// Find one best common ancestor of two changesets
    ///
    /// # Returns
    ///
    /// `None` when the histories share no changeset.
    pub fn find_best_common_ancestor(
        &self,
        source: &ObjectId,
        target: &ObjectId,
    ) -> anyhow::Result<Option<ObjectId>> {
        let common_ancestors = self.find_common_ancestors(source, target)?;
        debug_log!("Found common ancestors: {:?}", common_ancestors);

        let mut best = Vec::new();
        for candidate in &common_ancestors {
            let mut redundant = false;
            for other in &common_ancestors {
                if other != candidate && self.is_ancestor(candidate, other)? {
                    redundant = true;
                    break;
                }
            }
            if !redundant {
                best.push((self.generation(candidate)?, candidate.clone()));
            }
        }

        best.sort_by(|(gen_a, oid_a), (gen_b, oid_b)| gen_b.cmp(gen_a).then(oid_a.cmp(oid_b)));
        debug_log!("Best common ancestors: {:?}", best);

        Ok(best.into_iter().next().map(|(_, oid)| oid))
    }
}
