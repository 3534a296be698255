//! Round planning: greedy assignment of calls to slots.
//!
//! Planning is pure. Given the call list and the index of the first call not
//! yet run, [`plan_round`] fills up to `workers` slots and reports where the
//! next round starts.
//!
//! A call hard-conflicts with a slot when the slot's footprint holds one of
//! the call's keys as `write`, or holds it as `read` while the call writes it.
//! A call with exactly one hard conflict joins that slot, behind the calls it
//! conflicts with. A call with none goes to the least-loaded slot (lowest
//! index on ties). A call with several, or whose chosen slot is full, closes
//! the round: it and every later call wait for the next one.
//!
//! A reader of a key written earlier in the round therefore lands in the
//! writer's slot and runs after it, so it observes the write without waiting
//! for the next round.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::call::{Access, Call, KeyRules};

/// Calls assigned to one worker for one round, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub calls: Vec<usize>,
    pub footprint: BTreeMap<String, Access>,
}

impl Slot {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn conflicts_with(&self, rules: &KeyRules) -> bool {
        rules.iter().any(|(key, access)| match self.footprint.get(key) {
            Some(Access::Write) => true,
            Some(Access::Read) => access == Access::Write,
            None => false,
        })
    }

    fn assign(&mut self, index: usize, rules: &KeyRules) {
        self.calls.push(index);
        for (key, access) in rules.iter() {
            self.footprint
                .entry(key.to_string())
                .and_modify(|existing| *existing = existing.merge(access))
                .or_insert(access);
        }
    }
}

/// One round: the slots and the half-open range of calls they cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundPlan {
    pub slots: Vec<Slot>,
    /// First call of the round.
    pub start: usize,
    /// First call deferred to a later round (or the list length).
    pub end: usize,
}

impl RoundPlan {
    /// Number of calls in the round.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Slots with at least one call.
    pub fn active_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|slot| !slot.is_empty())
    }

    /// Slot index holding call `index`, if the call is in this round.
    pub fn slot_of(&self, index: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.calls.contains(&index))
    }
}

/// Plan the round that begins at `calls[start]`.
///
/// Always assigns at least one call when `start < calls.len()`.
pub fn plan_round(calls: &[Call], start: usize, workers: usize, capacity: usize) -> RoundPlan {
    let mut slots = vec![Slot::default(); workers.max(1)];
    let capacity = capacity.max(1);

    let start = start.min(calls.len());
    let mut end = start;
    for (index, call) in calls.iter().enumerate().skip(start) {
        match choose_slot(&slots, &call.keys, capacity) {
            Some(chosen) => {
                slots[chosen].assign(index, &call.keys);
                end = index + 1;
            }
            None => break,
        }
    }

    RoundPlan { slots, start, end }
}

/// Plan every round for `calls`.
pub fn plan_all(calls: &[Call], workers: usize, capacity: usize) -> Vec<RoundPlan> {
    let mut rounds = Vec::new();
    let mut start = 0;
    while start < calls.len() {
        let round = plan_round(calls, start, workers, capacity);
        start = round.end;
        rounds.push(round);
    }
    rounds
}

fn choose_slot(slots: &[Slot], rules: &KeyRules, capacity: usize) -> Option<usize> {
    let mut conflicting = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.conflicts_with(rules))
        .map(|(index, _)| index);

    let chosen = match (conflicting.next(), conflicting.next()) {
        (Some(_), Some(_)) => return None,
        (Some(only), None) => only,
        (None, _) => slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.len())
            .map(|(index, _)| index)?,
    };

    (slots[chosen].len() < capacity).then_some(chosen)
}
