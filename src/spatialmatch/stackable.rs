use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Debug;

use ordered_float::OrderedFloat;

use crate::spatialmatch::archetype::Archetype;
use crate::spatialmatch::common::*;
use crate::spatialmatch::mask::*;

#[derive(Debug)]
struct StackableMemo {
    stacks: Vec<Stack<Archetype>>,
    max_stacks: Vec<Stack<Archetype>>,
    max_relev: f64,
}

/// Enumerate the ways archetypes from distinct indexes combine into
/// multi-layer stacks, pruning on token masks, subquery collisions, and
/// index compatibility. The best-relevance frontier is kept apart from the
/// overflow list so late high scorers don't evict each other; when a new
/// relevance high overflows the frontier, its contents move into the
/// overflow list rather than being dropped.
pub fn stackable(
    phrasematch_results: &[PhrasematchResult<Archetype>],
    limit: usize,
) -> Vec<Stack<Archetype>> {
    let mut memo =
        StackableMemo { stacks: Vec::new(), max_stacks: Vec::new(), max_relev: 0. };
    if !phrasematch_results.is_empty() {
        stack_level(phrasematch_results, &mut memo, 0, 0, 0, &Stack::new(), limit);
    }

    let mut stacks = memo.stacks;
    stacks.extend(memo.max_stacks);

    // one-element stacks keep their full adjusted relevance; every extra
    // element shaves the multiplier down toward 0.9
    for stack in stacks.iter_mut() {
        let length_penalty = 0.9 + 0.1 / (stack.entries.len().max(1) as f64);
        stack.adj_relev *= length_penalty;
    }
    stacks
}

fn stack_level(
    phrasematch_results: &[PhrasematchResult<Archetype>],
    memo: &mut StackableMemo,
    idx: usize,
    mask: u32,
    nmask: u32,
    stack: &Stack<Archetype>,
    limit: usize,
) {
    // explore the levels below without this one first
    if idx + 1 < phrasematch_results.len() {
        stack_level(phrasematch_results, memo, idx + 1, mask, nmask, stack, limit);
    }

    let result = &phrasematch_results[idx];

    if nmasks_collide(nmask, result.nmask) {
        return;
    }
    for stacked in &stack.entries {
        if bmask_excludes(result.bmask, stacked.phrasematch.idx) {
            return;
        }
    }

    for archetype in &result.phrasematches {
        let next = &archetype.phrasematch;
        if masks_conflict(mask, next.mask) {
            continue;
        }

        // index order has to move with token order
        if let Some(first) = stack.entries.first() {
            if first.phrasematch.idx >= next.idx && mask != 0 && mask < next.mask {
                continue;
            }
        }

        let mut target = Stack {
            entries: stack.entries.clone(),
            relev: stack.relev + next.weight,
            adj_relev: stack.adj_relev + next.weight * next.edit_multiplier,
        };
        // the element covering the earliest tokens stays at the head
        if next.mask < mask {
            target.entries.insert(0, archetype.clone());
        } else {
            target.entries.push(archetype.clone());
        }

        if target.relev > 0.5 {
            if target.relev > memo.max_relev {
                if memo.max_stacks.len() >= limit {
                    // the old frontier is demoted into the overflow list
                    memo.stacks.append(&mut memo.max_stacks);
                    memo.max_stacks = vec![target.clone()];
                } else {
                    memo.max_stacks.push(target.clone());
                }
                memo.max_relev = target.relev;
            } else if target.relev == memo.max_relev {
                memo.max_stacks.push(target.clone());
            } else if memo.stacks.len() < limit {
                memo.stacks.push(target.clone());
            }
        }

        // grow the stack even when it hasn't cleared the relevance gate
        // yet; deeper levels may push it over
        if idx + 1 < phrasematch_results.len() {
            stack_level(
                phrasematch_results,
                memo,
                idx + 1,
                mask | next.mask,
                nmask | result.nmask,
                &target,
                limit,
            );
        }
    }
}

/// Drop stacks whose top index isn't in the allowed set. No set, no filter.
pub fn allowed<T: Borrow<Phrasematch> + Clone + Debug>(
    stacks: Vec<Stack<T>>,
    allowed_idx: &Option<HashSet<u16>>,
) -> Vec<Stack<T>> {
    match allowed_idx {
        None => stacks,
        Some(set) => stacks.into_iter().filter(|stack| set.contains(&stack.max_idx())).collect(),
    }
}

fn last_pm<T: Borrow<Phrasematch> + Clone + Debug>(stack: &Stack<T>) -> &Phrasematch {
    stack.entries.last().expect("stacks are non-empty").borrow()
}

/// Stack ordering, best first: adjusted relevance, then shorter stacks,
/// then raw relevance, then the last element's proximity/category/score
/// signals, and finally per-position idx scanned back to front.
pub fn sort_by_relev_length_idx<T: Borrow<Phrasematch> + Clone + Debug>(
    a: &Stack<T>,
    b: &Stack<T>,
) -> Ordering {
    OrderedFloat(b.adj_relev)
        .cmp(&OrderedFloat(a.adj_relev))
        .then_with(|| a.entries.len().cmp(&b.entries.len()))
        .then_with(|| OrderedFloat(b.relev).cmp(&OrderedFloat(a.relev)))
        .then_with(|| last_pm(b).prox_match.cmp(&last_pm(a).prox_match))
        .then_with(|| last_pm(b).cat_match.cmp(&last_pm(a).cat_match))
        .then_with(|| {
            OrderedFloat(last_pm(b).scorefactor).cmp(&OrderedFloat(last_pm(a).scorefactor))
        })
        .then_with(|| {
            // lengths are equal by now, so the zip covers every position
            for (entry_a, entry_b) in a.entries.iter().rev().zip(b.entries.iter().rev()) {
                match entry_a.borrow().idx.cmp(&entry_b.borrow().idx) {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                }
            }
            Ordering::Equal
        })
}

/// Element ordering within a stack: shallow zooms first, then idx, then
/// later tokens first.
pub fn sort_by_zoom_idx<T: Borrow<Phrasematch>>(a: &T, b: &T) -> Ordering {
    let (a, b) = (a.borrow(), b.borrow());
    a.zoom.cmp(&b.zoom).then_with(|| a.idx.cmp(&b.idx)).then_with(|| b.mask.cmp(&a.mask))
}
