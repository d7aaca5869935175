//! Monthly impact estimate carried on the last line of the final report.

use once_cell::sync::Lazy;
use regex::Regex;

/// Line the synthesizer is asked to close the report with.
pub const IMPACT_LINE_PREFIX: &str = "Estimated monthly impact:";

static IMPACT_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[\s*_#>-]*estimated\s+monthly\s+impact[\s*_]*:[\s*_]*\$?\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(thousand|million|k|m)?\b",
    )
    .ok()
});

/// Pull the estimated monthly impact out of a report, if it states one.
///
/// The last matching line wins, so a restated figure in a closing summary
/// overrides an earlier draft number.
pub fn parse_impact_value(report: &str) -> Option<f64> {
    let regex = IMPACT_LINE.as_ref()?;
    let caps = regex.captures_iter(report).last()?;
    let digits = caps.get(1)?.as_str().replace(',', "");
    let mut value: f64 = digits.parse().ok()?;
    match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("k" | "thousand") => value *= 1_000.0,
        Some("m" | "million") => value *= 1_000_000.0,
        _ => {}
    }
    Some(value)
}
