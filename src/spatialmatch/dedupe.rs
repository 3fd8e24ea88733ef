use std::collections::{HashMap, HashSet};

use crate::spatialmatch::common::*;

/// Sort spatialmatches best-first and keep at most one descending, one
/// ascending, and one single-layer result per leading feature. Along the
/// way, remember the best cover seen for every feature in any match.
pub fn dedupe(mut matches: Vec<Spatialmatch>) -> (Vec<Spatialmatch>, HashMap<u32, Cover>) {
    matches.sort_by(|a, b| b.cmp(a));

    let mut sets: HashMap<u32, Cover> = HashMap::new();
    for spatialmatch in &matches {
        for cover in &spatialmatch.covers {
            match sets.get(&cover.tmpid) {
                Some(best) if best.relev >= cover.relev => {}
                _ => {
                    sets.insert(cover.tmpid, cover.clone());
                }
            }
        }
    }

    let mut done_descending: HashSet<u32> = HashSet::new();
    let mut done_ascending: HashSet<u32> = HashSet::new();
    let mut done_single: HashSet<u32> = HashSet::new();

    let mut results = Vec::new();
    for spatialmatch in matches {
        let lead = spatialmatch.covers[0].tmpid;
        let len = spatialmatch.covers.len();

        if len > 1
            && spatialmatch.covers[0].idx > spatialmatch.covers[1].idx
            && !done_descending.contains(&lead)
        {
            done_descending.insert(lead);
            results.push(spatialmatch);
        } else if len > 1
            && spatialmatch.covers[0].idx < spatialmatch.covers[1].idx
            && !done_ascending.contains(&lead)
        {
            done_ascending.insert(lead);
            results.push(spatialmatch);
        } else if len == 1
            && !done_descending.contains(&lead)
            && !done_ascending.contains(&lead)
            && !done_single.contains(&lead)
        {
            done_single.insert(lead);
            results.push(spatialmatch);
        }
    }

    (results, sets)
}

#[cfg(test)]
mod test {
    use super::*;

    fn cover(idx: u16, tmpid: u32, relev: f64) -> Cover {
        Cover {
            x: 1,
            y: 1,
            idx,
            id: tmpid,
            tmpid,
            relev,
            distance: 0.,
            score: 1.,
            scoredist: 1.,
            matches_language: true,
            text: "main".to_string(),
            zoom: 6,
            prefix: Prefix::Disabled,
            mask: 1,
        }
    }

    fn spatialmatch(covers: Vec<Cover>, scoredist: f64) -> Spatialmatch {
        Spatialmatch { relev: 1., covers, partial_number: false, address: None, scoredist }
    }

    #[test]
    fn dedupe_direction_test() {
        let descending = spatialmatch(vec![cover(2, 100, 1.), cover(1, 200, 1.)], 4.);
        let ascending = spatialmatch(vec![cover(1, 100, 1.), cover(2, 200, 1.)], 3.);
        let descending_again = spatialmatch(vec![cover(2, 100, 1.), cover(1, 300, 1.)], 2.);

        let (results, _) =
            dedupe(vec![descending.clone(), ascending.clone(), descending_again]);
        assert_eq!(results.len(), 2, "one descending and one ascending survive per feature");
        assert_eq!(results[0].scoredist, 4., "the better descending result is the survivor");
        assert_eq!(results[1].scoredist, 3.);
    }

    #[test]
    fn dedupe_single_test() {
        let single = spatialmatch(vec![cover(1, 100, 1.)], 4.);
        let single_again = spatialmatch(vec![cover(1, 100, 1.)], 3.);
        let other = spatialmatch(vec![cover(1, 500, 1.)], 2.);

        let (results, _) = dedupe(vec![single, single_again, other]);
        assert_eq!(results.len(), 2, "one single-layer result per feature");
        assert_eq!(results[0].covers[0].tmpid, 100);
        assert_eq!(results[1].covers[0].tmpid, 500);
    }

    #[test]
    fn dedupe_single_shadowed_by_stacked_test() {
        let stacked = spatialmatch(vec![cover(2, 100, 1.), cover(1, 200, 1.)], 4.);
        let single = spatialmatch(vec![cover(2, 100, 1.)], 3.);

        let (results, _) = dedupe(vec![stacked, single]);
        assert_eq!(
            results.len(),
            1,
            "a single-layer result is dropped once its feature led a stacked one"
        );
    }

    #[test]
    fn dedupe_sets_test() {
        let a = spatialmatch(vec![cover(2, 100, 0.8), cover(1, 200, 0.9)], 4.);
        let b = spatialmatch(vec![cover(2, 100, 1.)], 3.);

        let (_, sets) = dedupe(vec![a, b]);
        assert_eq!(sets.len(), 2, "every feature lands in sets");
        assert_eq!(sets[&100].relev, 1., "sets keeps the best cover per feature");
        assert_eq!(sets[&200].relev, 0.9);
    }

    #[test]
    fn dedupe_sort_test() {
        let low = spatialmatch(vec![cover(1, 100, 1.)], 1.);
        let mut high = spatialmatch(vec![cover(1, 200, 1.)], 9.);
        high.relev = 1.;
        let mut better_relev = spatialmatch(vec![cover(1, 300, 0.9)], 1.);
        better_relev.relev = 0.9;

        let (results, _) = dedupe(vec![better_relev, low, high]);
        assert_eq!(results[0].covers[0].tmpid, 200, "relev then scoredist order");
        assert_eq!(results[1].covers[0].tmpid, 100);
        assert_eq!(results[2].covers[0].tmpid, 300);
    }
}
