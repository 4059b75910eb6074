//! Request facets and the facet-usage set.
//!
//! A facet is one of the five request data categories a chain may touch:
//! body, cookies, headers, params and query. Endpoints carry a [`FacetSet`]
//! computed at compile time so that per-request parsing only does the work
//! the chain actually needs.

use std::fmt;

/// One of the five request data categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Body,
    Cookies,
    Headers,
    Params,
    Query,
}

impl Facet {
    pub const ALL: [Facet; 5] = [Facet::Body, Facet::Cookies, Facet::Headers, Facet::Params, Facet::Query];

    pub fn as_str(self) -> &'static str {
        match self {
            Facet::Body => "body",
            Facet::Cookies => "cookies",
            Facet::Headers => "headers",
            Facet::Params => "params",
            Facet::Query => "query",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Facet::Body => 1 << 0,
            Facet::Cookies => 1 << 1,
            Facet::Headers => 1 << 2,
            Facet::Params => 1 << 3,
            Facet::Query => 1 << 4,
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A small set of [`Facet`]s.
///
/// Middleware, store and route links may declare the facets they touch;
/// the tree compiler unions those declarations into the endpoint's usage
/// set. Links without a declaration degrade to [`FacetSet::full`]: parsing
/// everything is the safe fallback, a missing facet at runtime is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FacetSet(u8);

const FULL: u8 = 0b1_1111;

impl FacetSet {
    pub const EMPTY: FacetSet = FacetSet(0);

    pub fn full() -> Self {
        FacetSet(FULL)
    }

    pub fn of(facets: &[Facet]) -> Self {
        let mut set = FacetSet::EMPTY;
        for facet in facets {
            set.insert(*facet);
        }
        set
    }

    pub fn insert(&mut self, facet: Facet) {
        self.0 |= facet.bit();
    }

    #[must_use]
    pub fn union(self, other: FacetSet) -> Self {
        FacetSet(self.0 | other.0)
    }

    pub fn contains(self, facet: Facet) -> bool {
        self.0 & facet.bit() != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_full(self) -> bool {
        self.0 == FULL
    }

    pub fn iter(self) -> impl Iterator<Item = Facet> {
        Facet::ALL.into_iter().filter(move |facet| self.contains(*facet))
    }
}
