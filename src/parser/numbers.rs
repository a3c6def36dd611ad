/// Cell contents the site uses for "no value".
const PLACEHOLDERS: &[&str] = &[
    "", "-", "--", "---", "—", "–", "n/a", "na", "nd", "b.d.", "bd", "brak", "x",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Numeric {
    pub value: f64,
    pub percent: bool,
}

/// Parse a locale-formatted number ("1 234,56", "+0,52%", "12.345,6").
/// Placeholders and anything unparsable yield `None`, never zero.
pub fn parse_numeric(raw: &str) -> Option<Numeric> {
    let mut s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '−' { '-' } else { c })
        .collect();

    if PLACEHOLDERS.contains(&s.to_lowercase().as_str()) {
        return None;
    }

    let percent = s.ends_with('%');
    if percent {
        s.pop();
    }
    let s = s.strip_prefix('+').unwrap_or(&s);

    let normalized = normalize_separators(s);
    let value = normalized.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(Numeric { value, percent })
}

pub fn parse_number(raw: &str) -> Option<f64> {
    parse_numeric(raw).map(|n| n.value)
}

/// Number at the end of a compound cell, e.g. "2004-11-10 / 40,00" or
/// "10.11.2004 1 040,00".
pub fn parse_trailing_number(raw: &str) -> Option<f64> {
    let tail = raw.rsplit('/').next().unwrap_or(raw);
    let tokens: Vec<&str> = tail.split_whitespace().collect();
    let (last, rest) = tokens.split_last()?;

    let mut number = last.to_string();
    for token in rest.iter().rev() {
        if token.len() <= 3 && token.chars().all(|c| c.is_ascii_digit()) {
            number.insert_str(0, token);
        } else {
            break;
        }
    }
    parse_number(&number)
}

/// Comma is the decimal mark unless both marks appear, in which case the
/// later one is. Repeated marks are grouping.
fn normalize_separators(s: &str) -> String {
    let commas = s.matches(',').count();
    let dots = s.matches('.').count();

    let decimal = match (commas, dots) {
        (0, 0) => None,
        (_, 0) if commas == 1 => Some(','),
        (0, _) if dots == 1 => Some('.'),
        (c, d) if c > 0 && d > 0 => {
            let last_comma = s.rfind(',');
            let last_dot = s.rfind('.');
            if last_comma > last_dot {
                Some(',')
            } else {
                Some('.')
            }
        }
        _ => None,
    };

    s.chars()
        .filter_map(|c| match c {
            ',' | '.' if Some(c) == decimal => Some('.'),
            ',' | '.' | '\'' => None,
            other => Some(other),
        })
        .collect()
}
