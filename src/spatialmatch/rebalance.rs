use crate::spatialmatch::common::*;

/// Recompute per-element weights so a stack's credit is split across its
/// layers: every element gets an even share, plus a small bonus scaled by
/// the weight it earned during matching, all damped by its edit
/// multiplier. A stack that doesn't cover every query token is charged one
/// phantom "garbage" layer. The returned stack is a deep clone; the input
/// is left untouched.
pub fn rebalance(query_len: usize, stack: &Stack<Phrasematch>) -> Stack<Phrasematch> {
    let covered = stack.mask().count_ones() as usize;
    let garbage = if covered == query_len { 0 } else { 1 };

    let total_length_bonus = 0.01 * ((garbage + stack.entries.len()) as f64);
    let weight_per_match = 1. / ((garbage + stack.entries.len()) as f64) - 0.01;

    let mut entries = stack.entries.clone();
    let mut sum = 0.;
    for entry in entries.iter_mut() {
        let weight =
            round8((weight_per_match + total_length_bonus * entry.weight) * entry.edit_multiplier);
        entry.weight = weight;
        sum += weight;
    }

    Stack { entries, relev: round8(sum).min(1.), adj_relev: stack.adj_relev }
}

#[cfg(test)]
mod test {
    use super::*;

    fn phrasematch(idx: u16, mask: u32, weight: f64, edit_multiplier: f64) -> Phrasematch {
        Phrasematch {
            idx,
            mask,
            nmask: 0,
            bmask: 0,
            weight,
            edit_multiplier,
            edit_distance: 0,
            prefix: Prefix::Disabled,
            scorefactor: 1.,
            prox_match: false,
            cat_match: false,
            partial_number: false,
            radius: None,
            zoom: 6,
            subquery: vec!["main".to_string()],
            address: None,
        }
    }

    fn stack(entries: Vec<Phrasematch>) -> Stack<Phrasematch> {
        let relev = entries.iter().map(|e| e.weight).sum();
        Stack { entries: entries.into_iter().collect(), relev, adj_relev: relev }
    }

    #[test]
    fn rebalance_full_coverage_test() {
        // two layers covering both query tokens: no garbage share
        let stack = stack(vec![phrasematch(0, 0b01, 0.5, 1.), phrasematch(1, 0b10, 0.5, 1.)]);
        let rebalanced = rebalance(2, &stack);
        assert_eq!(rebalanced.entries[0].weight, 0.5, "(1/2 - 0.01) + 0.02 * 0.5");
        assert_eq!(rebalanced.entries[1].weight, 0.5);
        assert_eq!(rebalanced.relev, 1.);
        assert_eq!(stack.entries[0].weight, 0.5, "input stack is untouched");
    }

    #[test]
    fn rebalance_garbage_token_test() {
        // one layer covering one of two query tokens: a garbage share is
        // charged against it
        let stack = stack(vec![phrasematch(0, 0b01, 1., 1.)]);
        let rebalanced = rebalance(2, &stack);
        assert_eq!(rebalanced.entries[0].weight, 0.51, "(1/2 - 0.01) + 0.02 * 1.0");
        assert_eq!(rebalanced.relev, 0.51);
    }

    #[test]
    fn rebalance_edit_multiplier_test() {
        let stack = stack(vec![phrasematch(0, 0b1, 1., 0.75)]);
        let rebalanced = rebalance(1, &stack);
        assert_eq!(rebalanced.entries[0].weight, 0.75, "((1/1 - 0.01) + 0.01 * 1.0) * 0.75");
        assert_eq!(rebalanced.relev, 0.75);
    }

    #[test]
    fn rebalance_sum_matches_relev_test() {
        let stack = stack(vec![
            phrasematch(0, 0b001, 0.33, 0.9),
            phrasematch(1, 0b010, 0.33, 1.),
            phrasematch(2, 0b100, 0.34, 0.8),
        ]);
        let rebalanced = rebalance(3, &stack);
        let sum: f64 = rebalanced.entries.iter().map(|e| e.weight).sum();
        assert_eq!(rebalanced.relev, round8(sum).min(1.), "relev is the clamped weight sum");

        let again = rebalance(3, &stack);
        for (a, b) in rebalanced.entries.iter().zip(again.entries.iter()) {
            assert_eq!(a.weight, b.weight, "rebalance is deterministic");
        }
    }

    #[test]
    fn rebalance_clamp_test() {
        // inflated inbound weights push the sum past 1; relev clamps
        let stack = stack(vec![phrasematch(0, 0b01, 1., 1.), phrasematch(1, 0b10, 1., 1.)]);
        let rebalanced = rebalance(2, &stack);
        assert_eq!(rebalanced.relev, 1., "relev never exceeds 1");
    }
}
