use core::cmp::{Ordering, Reverse};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use failure::Fail;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// idx doubles as a bit position in bmask, so the index count is capped by
// the bmask width
pub const MAX_INDEXES: u16 = 64;

// token masks are 32 bits wide, which caps the query length
pub const MAX_QUERY_TOKENS: usize = 32;

// default cap on the stack enumeration's overflow list
pub const STACKABLE_LIMIT: usize = 100;

// default cap on the number of stacks that go on to coalesce, applied both
// before and during archetype expansion
pub const SPATIALMATCH_STACK_LIMIT: usize = 33;

// soft cap on outstanding coalesce calls for a single query
pub const MAX_COALESCE_CONCURRENCY: usize = 500;

// miles; used when the last element of a stack carries no radius of its own
pub const PROXIMITY_RADIUS: f64 = 200.;

// miles; buffer drawn around the proximity point for partial house numbers
pub const PARTIAL_NUMBER_RADIUS: f64 = 10.;

// empirically-tuned boost applied to the scoredist of partial house number
// matches; do not change without re-running relevance acceptance
pub const PARTIAL_NUMBER_SCOREDIST_BOOST: f64 = 300.;

#[derive(Debug, Fail)]
pub enum SpatialmatchError {
    #[fail(display = "invalid options: {}", message)]
    InvalidOptions { message: String },
    #[fail(display = "index out of range: {}", idx)]
    IndexOutOfRange { idx: u16 },
    #[fail(display = "coalesce failed: {}", message)]
    CoalesceFailure { message: String },
    #[fail(display = "projection failed: {}", message)]
    ProjectionFailure { message: String },
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prefix {
    Disabled = 0,
    Enabled = 1,
}

/// One candidate interpretation of part of the query against one index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Phrasematch {
    pub idx: u16,
    /// query tokens this match covers
    pub mask: u32,
    /// subquery tokens this match represents
    pub nmask: u32,
    /// indexes this match's index may not stack with, one bit per idx
    pub bmask: u64,
    pub weight: f64,
    pub edit_multiplier: f64,
    pub edit_distance: u8,
    pub prefix: Prefix,
    pub scorefactor: f64,
    pub prox_match: bool,
    pub cat_match: bool,
    pub partial_number: bool,
    pub radius: Option<f64>,
    pub zoom: u16,
    pub subquery: Vec<String>,
    pub address: Option<String>,
}

/// The phrasematches for one index/interpretation, with the masks shared by
/// all of them lifted to the top.
#[derive(Debug, Clone)]
pub struct PhrasematchResult<T: Borrow<Phrasematch> + Clone + Debug> {
    pub idx: u16,
    pub nmask: u32,
    pub bmask: u64,
    pub phrasematches: Vec<T>,
}

/// An ordered run of matches from distinct indexes, with its relevance
/// attached to the container rather than recomputed from the elements.
#[derive(Debug, Clone)]
pub struct Stack<T: Borrow<Phrasematch> + Clone + Debug> {
    pub entries: SmallVec<[T; 4]>,
    pub relev: f64,
    pub adj_relev: f64,
}

impl<T: Borrow<Phrasematch> + Clone + Debug> Stack<T> {
    pub fn new() -> Self {
        Stack { entries: SmallVec::new(), relev: 0., adj_relev: 0. }
    }

    pub fn max_idx(&self) -> u16 {
        self.entries.iter().map(|entry| entry.borrow().idx).max().unwrap_or(0)
    }

    /// Union of the query tokens covered by every element
    pub fn mask(&self) -> u32 {
        self.entries.iter().fold(0u32, |mask, entry| mask | entry.borrow().mask)
    }
}

/// A single tile-level cover as the coalesce engine hands it back. Score
/// and scoredist are still in their packed grid encodings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheCover {
    pub x: u16,
    pub y: u16,
    pub idx: u16,
    pub id: u32,
    pub tmpid: u32,
    pub relev: f64,
    pub distance: f64,
    pub score: u8,
    pub scoredist: f64,
    pub matches_language: bool,
}

/// One coalesced context from the external engine, best cover first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheSpatialmatch {
    pub relev: f64,
    pub covers: Vec<CacheCover>,
}

/// A cache cover joined back up with the phrasematch that produced its
/// layer: scores decoded, text/zoom/prefix/mask carried over.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Cover {
    pub x: u16,
    pub y: u16,
    pub idx: u16,
    pub id: u32,
    pub tmpid: u32,
    pub relev: f64,
    pub distance: f64,
    pub score: f64,
    pub scoredist: f64,
    pub matches_language: bool,
    pub text: String,
    pub zoom: u16,
    pub prefix: Prefix,
    pub mask: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Spatialmatch {
    pub relev: f64,
    pub covers: Vec<Cover>,
    pub partial_number: bool,
    pub address: Option<String>,
    pub scoredist: f64,
}

impl Spatialmatch {
    #[inline(always)]
    fn sort_key(&self) -> (OrderedFloat<f64>, OrderedFloat<f64>, Reverse<u16>, bool) {
        (
            OrderedFloat(self.relev),
            OrderedFloat(self.scoredist),
            Reverse(self.covers[0].idx),
            self.address.is_some(),
        )
    }
}

impl Ord for Spatialmatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
impl PartialOrd for Spatialmatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Spatialmatch {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for Spatialmatch {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpatialmatchOptions {
    /// lon, lat
    pub proximity: Option<[f64; 2]>,
    /// w, s, e, n
    pub bbox: Option<[f64; 4]>,
    /// a stack survives only if its highest idx is in the set
    pub allowed_idx: Option<HashSet<u16>>,
    pub stackable_limit: usize,
    pub spatialmatch_stack_limit: usize,
}

impl Default for SpatialmatchOptions {
    fn default() -> Self {
        SpatialmatchOptions {
            proximity: None,
            bbox: None,
            allowed_idx: None,
            stackable_limit: STACKABLE_LIMIT,
            spatialmatch_stack_limit: SPATIALMATCH_STACK_LIMIT,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SpatialmatchOutput {
    pub results: Vec<Spatialmatch>,
    /// best cover seen for every feature, keyed by tmpid
    pub sets: HashMap<u32, Cover>,
    /// index ids of the stacks that coalesced to nothing
    pub waste: Vec<Vec<u16>>,
}

/// Round a relevance to 8 decimal places, half away from zero. All
/// relevance arithmetic rounds here at the edges so results reproduce
/// across platforms.
#[inline]
pub fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

#[test]
fn round8_test() {
    assert_eq!(round8(0.123456785), 0.12345679, "rounds half away from zero");
    assert_eq!(round8(0.1234567849), 0.12345678, "rounds down below the half");
    assert_eq!(round8(-0.123456785), -0.12345679, "negative values round away from zero");
    assert_eq!(round8(1.), 1., "integers pass through");
}

#[test]
fn options_serde_test() {
    let options = SpatialmatchOptions {
        proximity: Some([-77.03, 38.89]),
        bbox: None,
        allowed_idx: Some(vec![0u16, 2].into_iter().collect()),
        ..SpatialmatchOptions::default()
    };
    let json = serde_json::to_string(&options).unwrap();
    let back: SpatialmatchOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(options, back, "options survive a serde round trip");
}

#[test]
fn spatialmatch_sort_key_test() {
    let cover = |idx: u16| Cover {
        x: 1,
        y: 1,
        idx,
        id: 1,
        tmpid: 1,
        relev: 1.,
        distance: 0.,
        score: 1.,
        scoredist: 1.,
        matches_language: true,
        text: "main st".to_string(),
        zoom: 6,
        prefix: Prefix::Disabled,
        mask: 1,
    };
    let a = Spatialmatch {
        relev: 1.,
        covers: vec![cover(1)],
        partial_number: false,
        address: None,
        scoredist: 2.,
    };
    let b = Spatialmatch { scoredist: 1., ..a.clone() };
    assert!(a > b, "higher scoredist sorts ahead at equal relev");

    let c = Spatialmatch { covers: vec![cover(2)], ..b.clone() };
    assert!(b > c, "lower leading idx sorts ahead at equal relev and scoredist");

    let d = Spatialmatch { address: Some("12".to_string()), ..c.clone() };
    assert!(d > c, "an address wins the final tie-break");
}
