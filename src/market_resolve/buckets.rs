// Numeric range buckets
//
// A bucketed numeric market encodes each option's range in its label as
// "min - max". Buckets are half-open [min, max) except the last one, which
// also includes its upper bound.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::MarketOption;

static RE_BUCKET_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*-\s*(-?\d+(?:\.\d+)?)\s*$").expect("bucket label pattern")
});

/// A bucket option with its parsed bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket<'a> {
    pub option: &'a MarketOption,
    pub min: f64,
    pub max: f64,
}

/// Parse "min - max" into its bounds. Returns None for anything else,
/// including ranges where min >= max.
pub fn parse_bucket_label(label: &str) -> Option<(f64, f64)> {
    let caps = RE_BUCKET_LABEL.captures(label)?;
    let min: f64 = caps.get(1)?.as_str().parse().ok()?;
    let max: f64 = caps.get(2)?.as_str().parse().ok()?;
    (min < max).then_some((min, max))
}

/// Buckets ordered by lower bound. Options whose label does not parse are skipped.
pub fn sorted_buckets(options: &[MarketOption]) -> Vec<Bucket<'_>> {
    let mut buckets: Vec<Bucket<'_>> = options
        .iter()
        .filter_map(|option| {
            parse_bucket_label(&option.label).map(|(min, max)| Bucket { option, min, max })
        })
        .collect();
    buckets.sort_by(|a, b| a.min.total_cmp(&b.min));
    buckets
}

/// First bucket (by lower bound) containing `value`.
///
/// Lower bounds are inclusive and upper bounds exclusive, except for the last
/// bucket whose upper bound is inclusive. With [0,10) [10,20) [20,30], a value
/// of 10 lands in [10,20) and 30 lands in [20,30].
pub fn find_bucket(options: &[MarketOption], value: f64) -> Option<Bucket<'_>> {
    let buckets = sorted_buckets(options);
    let last = buckets.len().checked_sub(1)?;
    buckets.into_iter().enumerate().find_map(|(i, bucket)| {
        let below_max = value < bucket.max || (i == last && value <= bucket.max);
        (value >= bucket.min && below_max).then_some(bucket)
    })
}

/// First two labels whose ranges overlap once sorted by lower bound.
/// Touching bounds ("0 - 10", "10 - 20") do not overlap. Unparsable labels are ignored.
pub fn overlapping_labels<'a>(labels: &[&'a str]) -> Option<(&'a str, &'a str)> {
    let mut ranges: Vec<(&str, f64, f64)> = labels
        .iter()
        .filter_map(|label| parse_bucket_label(label).map(|(min, max)| (*label, min, max)))
        .collect();
    ranges.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranges
        .windows(2)
        .find(|pair| pair[1].1 < pair[0].2)
        .map(|pair| (pair[0].0, pair[1].0))
}
