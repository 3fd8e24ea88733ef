mod archetype;
mod coalesce;
mod common;
mod dedupe;
mod mask;
mod proximity;
mod rebalance;
mod scoring;
mod stackable;

pub use archetype::{collapse, expand, Archetype};
pub use coalesce::{CoalesceOptions, CoalesceSubquery, Coalescer};
pub use common::*;
pub use dedupe::dedupe;
pub use mask::check_idx;
pub use proximity::{
    bbox_intersection, inside_tile, partial_number_bbox, project_to_tile_xy, TileBbox, MAX_ZOOM,
};
pub use rebalance::rebalance;
pub use scoring::{decode_3bit_log_scale, decode_scoredist, encode_3bit_log_scale};
pub use stackable::{allowed, sort_by_relev_length_idx, sort_by_zoom_idx, stackable};

use failure::Error;
use log::trace;

/// Run the whole spatial matching pipeline over per-index phrasematch
/// candidates: collapse duplicates, enumerate stacks, rebalance their
/// relevance, coalesce them against the grid cache in parallel, and dedupe
/// into the final ranked set.
pub fn spatialmatch<C: Coalescer>(
    query_len: usize,
    phrasematch_results: &[PhrasematchResult<Phrasematch>],
    coalescer: &C,
    options: &SpatialmatchOptions,
) -> Result<SpatialmatchOutput, Error> {
    validate(query_len, phrasematch_results, options)?;

    let collapsed = collapse(phrasematch_results);
    let stacks = stackable(&collapsed, options.stackable_limit);
    let mut stacks = allowed(stacks, &options.allowed_idx);

    for stack in stacks.iter_mut() {
        stack.entries.sort_by(|a, b| sort_by_zoom_idx(a, b));
    }
    stacks.sort_by(|a, b| sort_by_relev_length_idx(a, b));
    stacks.truncate(options.spatialmatch_stack_limit);
    trace!("{} candidate stacks after sort and truncate", stacks.len());

    let expanded = expand(stacks, options.spatialmatch_stack_limit);
    let rebalanced: Vec<Stack<Phrasematch>> =
        expanded.iter().map(|stack| rebalance(query_len, stack)).collect();

    let (matches, waste) = coalesce::coalesce_stacks(rebalanced, coalescer, options)?;
    let (results, sets) = dedupe(matches);

    Ok(SpatialmatchOutput { results, sets, waste })
}

fn validate(
    query_len: usize,
    phrasematch_results: &[PhrasematchResult<Phrasematch>],
    options: &SpatialmatchOptions,
) -> Result<(), Error> {
    if query_len == 0 {
        return Err(SpatialmatchError::InvalidOptions {
            message: "query has no tokens".to_string(),
        }
        .into());
    }
    if query_len > MAX_QUERY_TOKENS {
        return Err(SpatialmatchError::InvalidOptions {
            message: format!("query has {} tokens; masks carry at most {}", query_len, MAX_QUERY_TOKENS),
        }
        .into());
    }
    if let Some(bbox) = options.bbox {
        if bbox[0] > bbox[2] || bbox[1] > bbox[3] {
            return Err(SpatialmatchError::InvalidOptions {
                message: format!("bbox {:?} has inverted corners", bbox),
            }
            .into());
        }
    }
    for result in phrasematch_results {
        check_idx(result.idx)?;
        for phrasematch in &result.phrasematches {
            check_idx(phrasematch.idx)?;
        }
    }
    Ok(())
}
