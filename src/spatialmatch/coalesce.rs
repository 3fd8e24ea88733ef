use std::collections::HashMap;

use failure::Error;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::spatialmatch::common::*;
use crate::spatialmatch::proximity::{
    bbox_intersection, inside_tile, partial_number_bbox, project_to_tile_xy, TileBbox,
};
use crate::spatialmatch::scoring::{decode_3bit_log_scale, decode_scoredist};

/// One stacked layer, translated by value for the coalesce boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CoalesceSubquery {
    pub idx: u16,
    pub mask: u32,
    pub weight: f64,
    pub zoom: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CoalesceOptions {
    /// z, x, y of the proximity point at the stack's max zoom
    pub centerzxy: Option<[u16; 3]>,
    /// miles
    pub radius: Option<f64>,
    /// tile cover of the effective bbox at the stack's lowest zoom
    pub bboxzxy: Option<TileBbox>,
}

/// The coalesce primitive this crate drives: intersects tile covers across
/// the layers of a stack and returns spatially-merged candidates, best
/// first. Implementations live with the grid cache.
pub trait Coalescer: Sync {
    fn coalesce(
        &self,
        stack: &[CoalesceSubquery],
        opts: &CoalesceOptions,
    ) -> Result<Vec<CacheSpatialmatch>, Error>;
}

// everything one coalesce call needs, captured by value so nothing is
// shared between in-flight calls
#[derive(Debug, Clone)]
struct StackJob {
    stack: Stack<Phrasematch>,
    subqueries: Vec<CoalesceSubquery>,
    opts: CoalesceOptions,
    skip: bool,
}

fn build_job(stack: Stack<Phrasematch>, options: &SpatialmatchOptions) -> Result<StackJob, Error> {
    let mut opts = CoalesceOptions::default();
    let mut skip = false;

    let last = stack.entries.last().expect("stacks are non-empty");
    let partial_number = last.partial_number;

    if let Some(center) = options.proximity {
        let max_zoom = stack.entries.iter().map(|entry| entry.zoom).max().unwrap_or(0);
        opts.centerzxy = Some(project_to_tile_xy(center, max_zoom)?);
        opts.radius = Some(last.radius.unwrap_or(PROXIMITY_RADIUS));
    }

    match (partial_number, options.proximity, options.bbox) {
        (true, Some(center), maybe_bbox) => {
            // partial house numbers only make sense near the proximity
            // point; constrain the search to a buffer around it
            let buffered = partial_number_bbox(center, PARTIAL_NUMBER_RADIUS);
            let constrained = match maybe_bbox {
                Some(bbox) => bbox_intersection(buffered, bbox),
                None => Some(buffered),
            };
            match constrained {
                Some(bbox) => opts.bboxzxy = Some(inside_tile(bbox, stack.entries[0].zoom)?),
                None => skip = true,
            }
        }
        (_, _, Some(bbox)) => {
            opts.bboxzxy = Some(inside_tile(bbox, stack.entries[0].zoom)?);
        }
        _ => {}
    }

    let subqueries = stack
        .entries
        .iter()
        .map(|entry| CoalesceSubquery {
            idx: entry.idx,
            mask: entry.mask,
            weight: entry.weight,
            zoom: entry.zoom,
        })
        .collect();

    Ok(StackJob { stack, subqueries, opts, skip })
}

/// Run coalesce for every rebalanced stack and wrap what comes back into
/// spatialmatches. Stacks run in parallel, at most
/// `MAX_COALESCE_CONCURRENCY` at a time; the first failure aborts the
/// whole query. Stacks that produce nothing land in the waste list.
pub fn coalesce_stacks<C: Coalescer>(
    stacks: Vec<Stack<Phrasematch>>,
    coalescer: &C,
    options: &SpatialmatchOptions,
) -> Result<(Vec<Spatialmatch>, Vec<Vec<u16>>), Error> {
    let mut jobs = Vec::with_capacity(stacks.len());
    for stack in stacks {
        jobs.push(build_job(stack, options)?);
    }

    let mut matches = Vec::new();
    let mut waste = Vec::new();
    for chunk in jobs.chunks(MAX_COALESCE_CONCURRENCY) {
        let chunk_results: Vec<(Vec<Spatialmatch>, Option<Vec<u16>>)> =
            chunk.par_iter().map(|job| run_job(job, coalescer)).collect::<Result<_, Error>>()?;
        for (wrapped, wasted) in chunk_results {
            matches.extend(wrapped);
            if let Some(idxes) = wasted {
                waste.push(idxes);
            }
        }
    }
    Ok((matches, waste))
}

fn run_job<C: Coalescer>(
    job: &StackJob,
    coalescer: &C,
) -> Result<(Vec<Spatialmatch>, Option<Vec<u16>>), Error> {
    let stack_idxes: Vec<u16> = job.stack.entries.iter().map(|entry| entry.idx).collect();

    if job.skip {
        debug!("stack over indexes {:?} constrained to an empty bbox", stack_idxes);
        return Ok((Vec::new(), Some(stack_idxes)));
    }

    let cache_matches = coalescer
        .coalesce(&job.subqueries, &job.opts)
        .map_err(|e| Error::from(SpatialmatchError::CoalesceFailure { message: e.to_string() }))?;

    if cache_matches.is_empty() {
        debug!("no coalesce results for stack over indexes {:?}", stack_idxes);
        return Ok((Vec::new(), Some(stack_idxes)));
    }

    let stack_by_idx: HashMap<u16, &Phrasematch> =
        job.stack.entries.iter().map(|entry| (entry.idx, entry)).collect();
    let partial_number =
        job.stack.entries.last().expect("stacks are non-empty").partial_number;
    let address = job.stack.entries.iter().find_map(|entry| entry.address.clone());

    let mut wrapped = Vec::with_capacity(cache_matches.len());
    for cache_match in cache_matches {
        wrapped.push(wrap_match(cache_match, &stack_by_idx, partial_number, &address)?);
    }
    Ok((wrapped, None))
}

fn wrap_match(
    cache_match: CacheSpatialmatch,
    stack_by_idx: &HashMap<u16, &Phrasematch>,
    partial_number: bool,
    address: &Option<String>,
) -> Result<Spatialmatch, Error> {
    if cache_match.covers.is_empty() {
        return Err(SpatialmatchError::CoalesceFailure {
            message: "context with no covers".to_string(),
        }
        .into());
    }

    let mut covers = Vec::with_capacity(cache_match.covers.len());
    for cache_cover in cache_match.covers {
        let source = stack_by_idx
            .get(&cache_cover.idx)
            .ok_or(SpatialmatchError::IndexOutOfRange { idx: cache_cover.idx })?;
        covers.push(Cover {
            x: cache_cover.x,
            y: cache_cover.y,
            idx: cache_cover.idx,
            id: cache_cover.id,
            tmpid: cache_cover.tmpid,
            relev: cache_cover.relev,
            distance: cache_cover.distance,
            score: decode_3bit_log_scale(cache_cover.score as f64, source.scorefactor),
            scoredist: decode_scoredist(cache_cover.scoredist, source.scorefactor),
            matches_language: cache_cover.matches_language,
            text: source.subquery.join(" "),
            zoom: source.zoom,
            prefix: source.prefix,
            mask: source.mask,
        });
    }

    let scoredist = if partial_number {
        covers[0].scoredist * PARTIAL_NUMBER_SCOREDIST_BOOST
    } else {
        covers[0].scoredist
    };

    Ok(Spatialmatch {
        relev: cache_match.relev,
        covers,
        partial_number,
        address: address.clone(),
        scoredist,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use smallvec::SmallVec;

    fn phrasematch(idx: u16, mask: u32, zoom: u16) -> Phrasematch {
        Phrasematch {
            idx,
            mask,
            nmask: 0,
            bmask: 0,
            weight: 1.,
            edit_multiplier: 1.,
            edit_distance: 0,
            prefix: Prefix::Disabled,
            scorefactor: 1000.,
            prox_match: false,
            cat_match: false,
            partial_number: false,
            radius: None,
            zoom,
            subquery: vec!["main".to_string(), "st".to_string()],
            address: None,
        }
    }

    fn stack(entries: Vec<Phrasematch>) -> Stack<Phrasematch> {
        let entries: SmallVec<[Phrasematch; 4]> = entries.into_iter().collect();
        Stack { entries, relev: 1., adj_relev: 1. }
    }

    #[test]
    fn build_job_proximity_test() {
        let stack = stack(vec![phrasematch(0, 0b01, 6), phrasematch(1, 0b10, 14)]);
        let options = SpatialmatchOptions {
            proximity: Some([-77.03, 38.89]),
            ..SpatialmatchOptions::default()
        };
        let job = build_job(stack, &options).unwrap();
        let centerzxy = job.opts.centerzxy.unwrap();
        assert_eq!(centerzxy[0], 14, "proximity projects at the stack's max zoom");
        assert_eq!(job.opts.radius, Some(PROXIMITY_RADIUS), "no per-match radius, use default");
        assert!(job.opts.bboxzxy.is_none());
        assert!(!job.skip);
    }

    #[test]
    fn build_job_radius_override_test() {
        let mut pm = phrasematch(0, 0b1, 6);
        pm.radius = Some(40.);
        let options = SpatialmatchOptions {
            proximity: Some([0., 0.]),
            ..SpatialmatchOptions::default()
        };
        let job = build_job(stack(vec![pm]), &options).unwrap();
        assert_eq!(job.opts.radius, Some(40.), "the last element's radius wins");
    }

    #[test]
    fn build_job_bbox_test() {
        let stack = stack(vec![phrasematch(0, 0b01, 6), phrasematch(1, 0b10, 14)]);
        let options = SpatialmatchOptions {
            bbox: Some([-10., -10., 10., 10.]),
            ..SpatialmatchOptions::default()
        };
        let job = build_job(stack, &options).unwrap();
        let bboxzxy = job.opts.bboxzxy.unwrap();
        assert_eq!(bboxzxy.zoom, 6, "bbox tiles are cut at the first element's zoom");
    }

    #[test]
    fn build_job_partial_number_empty_intersection_test() {
        let mut pm = phrasematch(0, 0b1, 14);
        pm.partial_number = true;
        let options = SpatialmatchOptions {
            proximity: Some([0., 0.]),
            // nowhere near the proximity buffer
            bbox: Some([50., 50., 60., 60.]),
            ..SpatialmatchOptions::default()
        };
        let job = build_job(stack(vec![pm]), &options).unwrap();
        assert!(job.skip, "an empty buffer intersection skips the stack");
    }

    #[test]
    fn wrap_match_test() {
        let pm_low = phrasematch(0, 0b01, 6);
        let pm_high = phrasematch(1, 0b10, 14);
        let by_idx: HashMap<u16, &Phrasematch> =
            vec![(0u16, &pm_low), (1u16, &pm_high)].into_iter().collect();

        let cache_match = CacheSpatialmatch {
            relev: 1.,
            covers: vec![
                CacheCover {
                    x: 5,
                    y: 5,
                    idx: 1,
                    id: 7,
                    tmpid: (1 << 25) + 7,
                    relev: 0.5,
                    distance: 0.,
                    score: 7,
                    scoredist: 7.,
                    matches_language: true,
                },
                CacheCover {
                    x: 1,
                    y: 1,
                    idx: 0,
                    id: 3,
                    tmpid: 3,
                    relev: 0.5,
                    distance: 0.,
                    score: 0,
                    scoredist: 0.,
                    matches_language: true,
                },
            ],
        };

        let wrapped = wrap_match(cache_match.clone(), &by_idx, false, &None).unwrap();
        assert_eq!(wrapped.covers.len(), 2);
        assert_eq!(wrapped.covers[0].score, 1000., "top score decodes to the scorefactor");
        assert_eq!(wrapped.covers[0].text, "main st");
        assert_eq!(wrapped.covers[0].zoom, 14, "cover inherits its phrasematch's zoom");
        assert_eq!(wrapped.scoredist, wrapped.covers[0].scoredist);

        let boosted = wrap_match(cache_match, &by_idx, true, &None).unwrap();
        assert_eq!(
            boosted.scoredist,
            wrapped.scoredist * PARTIAL_NUMBER_SCOREDIST_BOOST,
            "partial numbers boost scoredist by exactly 300"
        );

        let orphan = CacheSpatialmatch {
            relev: 1.,
            covers: vec![CacheCover {
                x: 0,
                y: 0,
                idx: 9,
                id: 1,
                tmpid: 1,
                relev: 1.,
                distance: 0.,
                score: 0,
                scoredist: 0.,
                matches_language: true,
            }],
        };
        assert!(
            wrap_match(orphan, &by_idx, false, &None).is_err(),
            "covers outside the stack are an error"
        );
    }
}
