use chrono::{DateTime, SecondsFormat};

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// RFC 3339 UTC rendering of a nanosecond timestamp, truncated to seconds.
pub fn format_timestamp(ns: i64) -> String {
    DateTime::from_timestamp_nanos(ns).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Human readable rendering of a nanosecond duration, e.g. `5s` or `1.5min`.
pub fn format_duration_ns(ns: i64) -> String {
    const UNITS: [(&str, i64); 4] = [
        ("h", 3_600 * NANOS_PER_SECOND),
        ("min", 60 * NANOS_PER_SECOND),
        ("s", NANOS_PER_SECOND),
        ("ms", 1_000_000),
    ];
    for (unit, size) in UNITS {
        if ns.abs() >= size {
            let value = ns as f64 / size as f64;
            return if ns % size == 0 {
                format!("{}{unit}", ns / size)
            } else {
                format!("{value}{unit}")
            };
        }
    }
    format!("{ns}ns")
}

/// Floor division for signed timestamps (rounds toward negative infinity).
pub fn floor_div(value: i64, divisor: i64) -> i64 {
    let q = value / divisor;
    if (value % divisor != 0) && ((value < 0) != (divisor < 0)) {
        q - 1
    } else {
        q
    }
}
