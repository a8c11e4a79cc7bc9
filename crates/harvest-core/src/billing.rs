//! Credit billing.
//!
//! Every function here is pure: the same inputs always produce the same
//! credit amount, with no hidden state and no I/O. The per-page tier table
//! is an input ([`PricingTable`]), not hard-coded logic.

use serde::{Deserialize, Serialize};

/// Search results are billed in blocks of this many.
pub const SEARCH_RESULTS_PER_BLOCK: u64 = 10;
/// Credits per started block of search results.
pub const SEARCH_CREDITS_PER_BLOCK: u64 = 2;
/// Credits per started block of search results under zero data retention.
pub const ZDR_SEARCH_CREDITS_PER_BLOCK: u64 = 10;
/// Credits per scraped page under zero data retention, regardless of tier.
pub const ZDR_CREDITS_PER_PAGE: u64 = 2;

/// Proxy tier requested for fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Basic,
    Stealth,
    Auto,
}

/// Fetch tier of a scrape, as far as pricing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrapeTier {
    pub proxy: ProxyMode,
    /// Whether extraction parsers (e.g. PDF) were requested.
    pub parsers: bool,
}

/// Per-page credit rates by fetch tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTable {
    pub basic_per_page: u64,
    pub stealth_per_page: u64,
    pub parsers_surcharge: u64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            basic_per_page: 1,
            stealth_per_page: 5,
            parsers_surcharge: 1,
        }
    }
}

impl PricingTable {
    pub fn per_page(&self, tier: ScrapeTier) -> u64 {
        let base = match tier.proxy {
            // Auto starts on the basic tier; an upgrade is billed as its own job.
            ProxyMode::Basic | ProxyMode::Auto => self.basic_per_page,
            ProxyMode::Stealth => self.stealth_per_page,
        };
        if tier.parsers {
            base + self.parsers_surcharge
        } else {
            base
        }
    }
}

/// `ceil(result_count / 10) * rate`, with the rate raised under zero data retention.
pub fn search_credits(result_count: u64, zero_data_retention: bool) -> u64 {
    let per_block = if zero_data_retention {
        ZDR_SEARCH_CREDITS_PER_BLOCK
    } else {
        SEARCH_CREDITS_PER_BLOCK
    };
    result_count.div_ceil(SEARCH_RESULTS_PER_BLOCK) * per_block
}

pub fn scrape_credits_per_page(
    tier: ScrapeTier,
    zero_data_retention: bool,
    table: &PricingTable,
) -> u64 {
    if zero_data_retention {
        ZDR_CREDITS_PER_PAGE
    } else {
        table.per_page(tier)
    }
}

/// Search credits plus one per-page charge for every page actually fetched.
pub fn search_with_scrape_credits(
    result_count: u64,
    pages_fetched: u64,
    tier: ScrapeTier,
    zero_data_retention: bool,
    table: &PricingTable,
) -> u64 {
    search_credits(result_count, zero_data_retention)
        + pages_fetched * scrape_credits_per_page(tier, zero_data_retention, table)
}

/// Shape of a finished operation, as needed for billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillableOperation {
    Search {
        results: u64,
        /// Tier and number of pages actually fetched, when results were scraped.
        scraped: Option<(ScrapeTier, u64)>,
    },
    /// Any document-producing kind: one unit per document actually produced.
    Documents { tier: ScrapeTier, produced: u64 },
}

/// Credits owed for an operation. Failed work is excluded by construction:
/// callers pass only what was actually produced.
pub fn credits_for(
    operation: &BillableOperation,
    zero_data_retention: bool,
    table: &PricingTable,
) -> u64 {
    match *operation {
        BillableOperation::Search {
            results,
            scraped: None,
        } => search_credits(results, zero_data_retention),
        BillableOperation::Search {
            results,
            scraped: Some((tier, pages)),
        } => search_with_scrape_credits(results, pages, tier, zero_data_retention, table),
        BillableOperation::Documents { tier, produced } => {
            produced * scrape_credits_per_page(tier, zero_data_retention, table)
        }
    }
}
