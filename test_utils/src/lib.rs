use carmen_spatialmatch::spatialmatch::*;

use failure::Error;

use std::collections::HashMap;

// Util functions and doubles for tests and benchmarks

// the native engine caps how many contexts it hands back
pub const MAX_CONTEXTS: usize = 40;

/// Round a float to a number of digits past the decimal point
pub fn round(value: f64, digits: i32) -> f64 {
    let multiplier = 10.0_f64.powi(digits);
    (value * multiplier).round() / multiplier
}

/// Build a phrasematch with everything defaulted except the stacking fields
pub fn phrasematch(idx: u16, mask: u32, weight: f64, zoom: u16) -> Phrasematch {
    Phrasematch {
        idx,
        mask,
        nmask: mask,
        bmask: 0,
        weight,
        edit_multiplier: 1.,
        edit_distance: 0,
        prefix: Prefix::Disabled,
        scorefactor: 1.,
        prox_match: false,
        cat_match: false,
        partial_number: false,
        radius: None,
        zoom,
        subquery: vec!["main".to_string()],
        address: None,
    }
}

/// Wrap phrasematches for one index interpretation into a result
pub fn phrasematch_result(
    idx: u16,
    nmask: u32,
    bmask: u64,
    phrasematches: Vec<Phrasematch>,
) -> PhrasematchResult<Phrasematch> {
    PhrasematchResult { idx, nmask, bmask, phrasematches }
}

/// One feature in a MemCoalescer index
#[derive(Debug, Clone)]
pub struct MemEntry {
    pub id: u32,
    pub x: u16,
    pub y: u16,
    pub relev: f64,
    pub score: u8,
}

#[derive(Debug, Clone)]
pub struct MemIndex {
    pub zoom: u16,
    pub entries: Vec<MemEntry>,
}

/// In-memory stand-in for the native coalesce engine: walks a stack from
/// its lowest zoom up, keeping only contexts whose tiles nest, the same
/// parent-tile scaling the real engine applies. Good enough to drive the
/// pipeline end to end in tests.
#[derive(Debug, Clone, Default)]
pub struct MemCoalescer {
    pub indexes: HashMap<u16, MemIndex>,
}

impl MemCoalescer {
    pub fn insert(&mut self, idx: u16, zoom: u16, entries: Vec<MemEntry>) {
        self.indexes.insert(idx, MemIndex { zoom, entries });
    }

    fn cover(
        &self,
        subquery: &CoalesceSubquery,
        index: &MemIndex,
        entry: &MemEntry,
        opts: &CoalesceOptions,
    ) -> CacheCover {
        let (distance, scoredist) = match opts.centerzxy {
            Some([center_zoom, center_x, center_y]) => {
                // compare at the proximity zoom
                let shift = center_zoom.saturating_sub(index.zoom);
                let dx = ((entry.x as u32) << shift) as f64 - center_x as f64;
                let dy = ((entry.y as u32) << shift) as f64 - center_y as f64;
                let distance = (dx * dx + dy * dy).sqrt();
                (distance, (entry.score as f64 + 1.) * 100. / (1. + distance))
            }
            None => (0., entry.score as f64),
        };
        CacheCover {
            x: entry.x,
            y: entry.y,
            idx: subquery.idx,
            id: entry.id,
            tmpid: ((subquery.idx as u32) << 25) + entry.id,
            relev: entry.relev * subquery.weight,
            distance,
            score: entry.score,
            scoredist,
            matches_language: true,
        }
    }

    fn in_bbox(&self, zoom: u16, x: u16, y: u16, bbox: &TileBbox) -> bool {
        // the bbox is cut at the stack's lowest zoom; scale tiles down to it
        let shift = zoom.saturating_sub(bbox.zoom);
        let x = x >> shift;
        let y = y >> shift;
        x >= bbox.min_x && x <= bbox.max_x && y >= bbox.min_y && y <= bbox.max_y
    }
}

impl Coalescer for MemCoalescer {
    fn coalesce(
        &self,
        stack: &[CoalesceSubquery],
        opts: &CoalesceOptions,
    ) -> Result<Vec<CacheSpatialmatch>, Error> {
        let mut subqueries: Vec<&CoalesceSubquery> = stack.iter().collect();
        subqueries.sort_by_key(|subquery| (subquery.zoom, subquery.idx));

        // contexts keyed by the tile of their deepest layer so far
        let mut contexts: HashMap<(u16, u16), Vec<CacheSpatialmatch>> = HashMap::new();
        let mut prev_zoom = 0;

        for (layer, subquery) in subqueries.iter().enumerate() {
            let index = self
                .indexes
                .get(&subquery.idx)
                .ok_or_else(|| failure::format_err!("no index for idx {}", subquery.idx))?;

            let mut next: HashMap<(u16, u16), Vec<CacheSpatialmatch>> = HashMap::new();
            for entry in &index.entries {
                if let Some(bbox) = &opts.bboxzxy {
                    if !self.in_bbox(index.zoom, entry.x, entry.y, bbox) {
                        continue;
                    }
                }
                let cover = self.cover(subquery, index, entry, opts);
                if layer == 0 {
                    next.entry((entry.x, entry.y)).or_insert_with(Vec::new).push(
                        CacheSpatialmatch { relev: cover.relev, covers: vec![cover] },
                    );
                } else {
                    let scale = 1u16 << (index.zoom - prev_zoom);
                    let parent = (entry.x / scale, entry.y / scale);
                    if let Some(parents) = contexts.get(&parent) {
                        for parent_context in parents {
                            let mut context = parent_context.clone();
                            context.covers.insert(0, cover.clone());
                            context.relev += cover.relev;
                            next.entry((entry.x, entry.y))
                                .or_insert_with(Vec::new)
                                .push(context);
                        }
                    }
                }
            }
            contexts = next;
            prev_zoom = index.zoom;
        }

        let mut out: Vec<CacheSpatialmatch> =
            contexts.into_iter().flat_map(|(_, contexts)| contexts).collect();
        out.sort_by(|a, b| {
            use std::cmp::Reverse;
            let key = |context: &CacheSpatialmatch| {
                (
                    Reverse(ordered_f64(context.relev)),
                    Reverse(ordered_f64(context.covers[0].scoredist)),
                    context.covers[0].idx,
                    context.covers[0].x,
                    context.covers[0].y,
                    context.covers[0].id,
                )
            };
            key(a).cmp(&key(b))
        });
        out.truncate(MAX_CONTEXTS);
        Ok(out)
    }
}

// f64 sort keys without pulling in a float wrapper; the doubles never hold
// NaN or negatives
fn ordered_f64(value: f64) -> u64 {
    (value * 1e8).round() as u64
}

/// Hands back the same contexts no matter the stack
#[derive(Debug, Clone, Default)]
pub struct CannedCoalescer {
    pub matches: Vec<CacheSpatialmatch>,
}

impl Coalescer for CannedCoalescer {
    fn coalesce(
        &self,
        _stack: &[CoalesceSubquery],
        _opts: &CoalesceOptions,
    ) -> Result<Vec<CacheSpatialmatch>, Error> {
        Ok(self.matches.clone())
    }
}

/// Always fails, for exercising the error path
#[derive(Debug, Clone, Default)]
pub struct FailingCoalescer;

impl Coalescer for FailingCoalescer {
    fn coalesce(
        &self,
        _stack: &[CoalesceSubquery],
        _opts: &CoalesceOptions,
    ) -> Result<Vec<CacheSpatialmatch>, Error> {
        Err(failure::format_err!("cache went away"))
    }
}
