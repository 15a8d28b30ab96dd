//! Resource quantity comparison. The API server rewrites quantities into a
//! canonical form ("2000m" comes back as "2"), so string equality is not
//! enough to tell whether a desired limit or quota already holds.

/// Keys whose object values map resource names to quantities.
const QUANTITY_MAPS: &[&str] = &[
    "limits",
    "requests",
    "hard",
    "default",
    "defaultRequest",
    "max",
    "min",
    "maxLimitRequestRatio",
    "capacity",
    "allocatable",
];

pub(crate) fn is_quantity_map(key: &str) -> bool {
    QUANTITY_MAPS.contains(&key)
}

/// Parse a quantity into nano units. `None` when the text is not a quantity.
pub fn parse_nanos(s: &str) -> Option<i128> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    if number.is_empty() {
        return None;
    }

    let (neg, digits) = match number.as_bytes()[0] {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    // value = mantissa * 10^exp10 * 2^exp2
    let mut mantissa: i128 = 0;
    for b in whole.bytes().chain(frac.bytes()) {
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(b - b'0'))?;
    }
    let mut exp10: i32 = 9 - frac.len() as i32;
    let mut exp2: u32 = 0;
    match suffix {
        "" => {}
        "n" => exp10 -= 9,
        "u" => exp10 -= 6,
        "m" => exp10 -= 3,
        "k" => exp10 += 3,
        "M" => exp10 += 6,
        "G" => exp10 += 9,
        "T" => exp10 += 12,
        "P" => exp10 += 15,
        "E" => exp10 += 18,
        "Ki" => exp2 = 10,
        "Mi" => exp2 = 20,
        "Gi" => exp2 = 30,
        "Ti" => exp2 = 40,
        "Pi" => exp2 = 50,
        "Ei" => exp2 = 60,
        _ => {
            let exp = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
            exp10 += exp.parse::<i32>().ok()?;
        }
    }

    let mut value = mantissa.checked_mul(1i128.checked_shl(exp2)?)?;
    if exp10 >= 0 {
        value = value.checked_mul(10i128.checked_pow(exp10 as u32)?)?;
    } else {
        // sub-nano precision is rounded up, as the API server does
        let div = 10i128.checked_pow(exp10.unsigned_abs())?;
        value = (value + div - 1) / div;
    }
    Some(if neg { -value } else { value })
}

/// Whether two quantity strings denote the same amount.
pub fn same_quantity(a: &str, b: &str) -> bool {
    a == b || matches!((parse_nanos(a), parse_nanos(b)), (Some(x), Some(y)) if x == y)
}
