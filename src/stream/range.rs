use crate::storage::ByteRange;

/// Parse a single `bytes=` range against an object of `total` bytes.
///
/// Accepts `start-end`, `start-` and the suffix form `-len`. An end past the
/// object is clamped. Anything else, including multiple ranges, reversed
/// bounds or a start outside the object, yields `None` and the caller
/// serves the whole object.
pub fn parse_range(spec: &str, total: u64) -> Option<ByteRange> {
    if total == 0 {
        return None;
    }
    let last = total - 1;

    let spec = spec.trim().strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    let range = match (start.is_empty(), end.is_empty()) {
        (true, true) => return None,
        (true, false) => {
            let suffix = end.parse::<u64>().ok().filter(|len| *len > 0)?;
            ByteRange {
                start: total.saturating_sub(suffix),
                end: last,
            }
        }
        (false, true) => ByteRange {
            start: start.parse().ok()?,
            end: last,
        },
        (false, false) => ByteRange {
            start: start.parse().ok()?,
            end: end.parse::<u64>().ok()?.min(last),
        },
    };

    if range.start > range.end || range.start > last {
        return None;
    }
    Some(range)
}
