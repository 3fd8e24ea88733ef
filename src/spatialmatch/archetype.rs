use std::borrow::Borrow;
use std::collections::HashMap;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::spatialmatch::common::*;

/// An equivalence class of phrasematches that stack identically. The
/// representative carries the scoring fields used during enumeration; the
/// exemplars are swapped back in once stacks have been chosen.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub phrasematch: Phrasematch,
    pub exemplars: Vec<Phrasematch>,
}

impl Borrow<Phrasematch> for Archetype {
    fn borrow(&self) -> &Phrasematch {
        &self.phrasematch
    }
}

type CollapseKey = (u32, OrderedFloat<f64>, OrderedFloat<f64>, Prefix);

/// Fold each result's duplicate phrasematches into archetypes, keyed by the
/// fields that affect stacking. Groups keep first-seen order.
pub fn collapse(
    results: &[PhrasematchResult<Phrasematch>],
) -> Vec<PhrasematchResult<Archetype>> {
    results
        .iter()
        .map(|result| {
            let mut archetypes: Vec<Archetype> = Vec::new();
            let mut by_key: HashMap<CollapseKey, usize> = HashMap::new();

            for phrasematch in &result.phrasematches {
                let key = (
                    phrasematch.mask,
                    OrderedFloat(phrasematch.weight),
                    OrderedFloat(phrasematch.edit_multiplier),
                    phrasematch.prefix,
                );
                match by_key.get(&key) {
                    Some(&slot) => archetypes[slot].exemplars.push(phrasematch.clone()),
                    None => {
                        by_key.insert(key, archetypes.len());
                        archetypes.push(Archetype {
                            phrasematch: phrasematch.clone(),
                            exemplars: vec![phrasematch.clone()],
                        });
                    }
                }
            }

            // low-confidence penalty for heavily-collapsed single-token
            // prefix groups; applied to the representative only, so it
            // never compounds through expansion
            for archetype in archetypes.iter_mut() {
                let first = &archetype.exemplars[0];
                if first.subquery.len() == 1
                    && first.edit_distance == 0
                    && first.prefix != Prefix::Disabled
                    && archetype.exemplars.len() > 2
                {
                    archetype.phrasematch.edit_multiplier *= 0.99;
                }
            }

            PhrasematchResult {
                idx: result.idx,
                nmask: result.nmask,
                bmask: result.bmask,
                phrasematches: archetypes,
            }
        })
        .collect()
}

/// Expand stacks of archetypes back into stacks of phrasematches: the
/// cartesian product over exemplars in stack order, rightmost position
/// fastest, emitting until max_out stacks exist across all inputs.
pub fn expand(stacks: Vec<Stack<Archetype>>, max_out: usize) -> Vec<Stack<Phrasematch>> {
    let mut out: Vec<Stack<Phrasematch>> = Vec::new();
    for stack in stacks {
        if out.len() >= max_out {
            break;
        }
        let remaining = max_out - out.len();
        let combos = stack
            .entries
            .iter()
            .map(|archetype| archetype.exemplars.iter())
            .multi_cartesian_product()
            .take(remaining);
        for combo in combos {
            out.push(Stack {
                entries: combo.into_iter().cloned().collect(),
                relev: stack.relev,
                adj_relev: stack.adj_relev,
            });
        }
    }
    out
}
