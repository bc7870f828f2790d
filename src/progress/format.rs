//! Human-readable byte counts.
//!
//! Mirrors the compact form rsync users expect: binary units, at most four
//! significant digits, no decimals for exact values.

/// Unit letters for successive powers of 1024
const UNITS: [&str; 8] = ["K", "M", "G", "T", "P", "E", "Z", "Y"];

const STEP: f64 = 1024.0;

/// Format a byte count, e.g. `2560.0` -> `"2.50K"`, `1024.0` -> `"1K"`.
///
/// The decimal budget is chosen from the digits of the integer part before
/// rounding, so a carry such as 9.999 renders as `"10.00"`.
pub fn format_bytes(count: f64) -> String {
    let (scaled, unit) = scale(count);

    let digits = integer_digits(scaled);
    let mut decimals = 4usize.saturating_sub(digits).min(2);
    if scaled.fract() == 0.0 {
        decimals = 0;
    }

    let factor = 10f64.powi(decimals as i32);
    let rounded = (scaled * factor + 0.5).floor() / factor;
    format!("{:.*}{}", decimals, rounded, unit)
}

/// Split a count into (value, unit) with value < 1024 where a unit exists.
fn scale(count: f64) -> (f64, &'static str) {
    let mut scaled = if count.is_finite() && count > 0.0 {
        count
    } else {
        0.0
    };

    let mut unit = "";
    for next in UNITS {
        if scaled < STEP {
            break;
        }
        scaled /= STEP;
        unit = next;
    }
    (scaled, unit)
}

fn integer_digits(value: f64) -> usize {
    let mut whole = value.floor() as u128;
    let mut digits = 1;
    while whole >= 10 {
        whole /= 10;
        digits += 1;
    }
    digits
}
