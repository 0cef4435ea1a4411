// Cell formatting for metric rows

/// Rendered for a value that cannot be computed
pub const NOT_AVAILABLE: &str = "N/A";

/// `numerator / denominator`, or `None` for a zero or non-finite result
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

/// Scaled with a G/M/K suffix, two decimals
pub fn large_number(value: f64) -> String {
    if !value.is_finite() {
        return NOT_AVAILABLE.to_string();
    }
    let magnitude = value.abs();
    if magnitude > 1e9 {
        format!("{:.2} G", value / 1e9)
    } else if magnitude > 1e6 {
        format!("{:.2} M", value / 1e6)
    } else if magnitude > 1e3 {
        format!("{:.2} K", value / 1e3)
    } else {
        format!("{value:.2}")
    }
}

pub fn fixed2(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.2}"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// A fraction rendered as a percentage
pub fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}%", v * 100.0),
        _ => NOT_AVAILABLE.to_string(),
    }
}

pub fn watts(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.2} W"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

pub fn ghz(hz: Option<f64>) -> String {
    match hz {
        Some(v) if v.is_finite() => format!("{:.2} GHz", v / 1e9),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Large number with a unit suffix, e.g. `"1.50 GB/s"` or `"12.00 B/s"`
pub fn with_unit(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let number = large_number(v);
            if number.ends_with(|c: char| c.is_ascii_digit()) {
                format!("{number} {unit}")
            } else {
                format!("{number}{unit}")
            }
        }
        _ => NOT_AVAILABLE.to_string(),
    }
}
