use std::sync::LazyLock;

use regex::Regex;

/// Display-string grammar for funding totals, highest priority first.
/// The matched substring is preserved verbatim as the display value.
static DISPLAY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "up to £X" with an explicit magnitude word
        r"(?i)up to £[\d,]+(?:\.\d+)?\s+(?:million|thousand|k|m)\b",
        // range: "£X (million) to £Y (million)"
        r"(?i)£[\d,]+(?:\.\d+)?\s*(?:million|thousand|k|m)?\s+to\s+£[\d,]+(?:\.\d+)?\s*(?:million|thousand|k|m)?",
        // prize phrasings
        r"(?i)prize pot of £[\d,]+(?:\.\d+)?(?:\s*(?:million|thousand|k|m))?",
        r"(?i)total prize fund of £[\d,]+(?:\.\d+)?(?:\s*(?:million|thousand|k|m))?",
        r"(?i)prizes? worth £[\d,]+(?:\.\d+)?(?:\s*(?:million|thousand|k|m))?",
        r"(?i)share of(?: a| an)? £[\d,]+(?:\.\d+)?(?:\s*(?:million|thousand|k|m))?",
        // clearly formatted amount: at least four digit/comma chars
        r"£[\d,]{4,}(?:\.\d+)?",
        // any amount carrying a magnitude word
        r"(?i)£[\d,]+(?:\.\d+)?\s*(?:million|thousand|k|m)\b",
        // last resort: "up to £X" only when X is a large figure
        r"(?i)up to £[\d,]{4,}",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// First £-amount with optional magnitude inside a display string.
static VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)£\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|k|m)?\b").unwrap());

#[derive(Clone, Copy)]
enum Bound {
    Range,
    Max,
}

/// Per-project grammar, highest priority first. Range patterns capture
/// (min, min_mag, max, max_mag); Max patterns capture (max, max_mag).
static PROJECT_PATTERNS: LazyLock<Vec<(Regex, Bound)>> = LazyLock::new(|| {
    [
        (
            r"(?i)between\s*£\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?\s*and\s*£\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?",
            Bound::Range,
        ),
        (
            r"(?i)£\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?\s*(?:to|and|-)\s*£\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?",
            Bound::Range,
        ),
        (
            r"(?i)up to £\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?\b",
            Bound::Max,
        ),
        (
            r"(?i)not exceed £\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?\b",
            Bound::Max,
        ),
        (
            r"(?i)can apply for £\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?\b",
            Bound::Max,
        ),
    ]
    .iter()
    .map(|(p, b)| (Regex::new(p).unwrap(), *b))
    .collect()
});

/// Any bare £-amount, used for the single-mention fallback.
static PLAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)£\s*([\d,]+(?:\.\d+)?)\s*(million|thousand|m|k)?\b").unwrap());

static PRIZE_POT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)share of (?:a |an )?£\s*([\d,.]+)\s*(?:m\b|million)?\s*prize\s*(?:pot|fund)")
        .unwrap()
});

static PER_AWARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)£\s*([\d,.]+)\s*(k|thousand|million|m)?\s*(?:each\b|per\s+(?:winner|project|award))")
        .unwrap()
});

/// Find the most salient money mention in free text, preserving the
/// matched substring. None when nothing credible matches.
pub fn find_money_mention(text: &str) -> Option<String> {
    DISPLAY_PATTERNS
        .iter()
        .find_map(|re| re.find(text).map(|m| m.as_str().to_string()))
}

/// Parse a total-funding amount from free text.
///
/// Returns (display, canonical GBP). Display is the matched substring;
/// the canonical value is None when the display carries no parseable
/// figure. Neither is ever fabricated.
pub fn parse_total(text: &str) -> (Option<String>, Option<i64>) {
    let display = match find_money_mention(text) {
        Some(d) => d,
        None => return (None, None),
    };
    let amount = parse_display_value(&display);
    (Some(display), amount)
}

/// Parse per-project funding bounds from free text.
///
/// Returns (min, max, display). Single-bound forms yield (None, max).
/// A lone bare amount with no other monetary mention is treated as an
/// upper bound. Display strings are synthesized from the parsed bounds.
pub fn parse_project_range(text: &str) -> (Option<i64>, Option<i64>, Option<String>) {
    for (re, bound) in PROJECT_PATTERNS.iter() {
        let caps = match re.captures(text) {
            Some(c) => c,
            None => continue,
        };
        match bound {
            Bound::Range => {
                let min = apply_magnitude(&caps[1], caps.get(2).map(|m| m.as_str()));
                let max = apply_magnitude(&caps[3], caps.get(4).map(|m| m.as_str()));
                if let (Some(min), Some(max)) = (min, max) {
                    let display = format!("{} to {}", format_amount(min), format_amount(max));
                    return (Some(min), Some(max), Some(display));
                }
            }
            Bound::Max => {
                if let Some(max) = apply_magnitude(&caps[1], caps.get(2).map(|m| m.as_str())) {
                    return (None, Some(max), Some(format!("up to {}", format_amount(max))));
                }
            }
        }
    }

    // Exactly one bare amount in the whole text: treat as an upper bound.
    let mentions: Vec<_> = PLAIN_RE.captures_iter(text).collect();
    if mentions.len() == 1 {
        let caps = &mentions[0];
        if let Some(max) = apply_magnitude(&caps[1], caps.get(2).map(|m| m.as_str())) {
            return (None, Some(max), Some(format!("up to {}", format_amount(max))));
        }
    }

    (None, None, None)
}

/// Prize-specific grammar: "share of a £X million prize pot" (millions
/// assumed when the magnitude is omitted) and "£X per winner/each".
pub fn parse_prize(text: &str) -> Option<(String, i64)> {
    if let Some(caps) = PRIZE_POT_RE.captures(text) {
        let amount = apply_magnitude(&caps[1], Some("million"))?;
        return Some((caps[0].to_string(), amount));
    }
    if let Some(caps) = PER_AWARD_RE.captures(text) {
        let amount = apply_magnitude(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        return Some((caps[0].to_string(), amount));
    }
    None
}

fn parse_display_value(display: &str) -> Option<i64> {
    let caps = VALUE_RE.captures(display)?;
    apply_magnitude(&caps[1], caps.get(2).map(|m| m.as_str()))
}

fn apply_magnitude(raw: &str, magnitude: Option<&str>) -> Option<i64> {
    let value: f64 = raw.replace(',', "").parse().ok()?;
    let scaled = match magnitude.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m == "million" || m == "m" => value * 1_000_000.0,
        Some(m) if m == "thousand" || m == "k" => value * 1_000.0,
        _ => value,
    };
    Some(scaled.round() as i64)
}

fn format_amount(value: i64) -> String {
    if value >= 1_000_000 {
        format!("£{:.1}m", value as f64 / 1_000_000.0).replace(".0m", "m")
    } else if value >= 1_000 {
        format!("£{}", group_thousands(value))
    } else {
        format!("£{}", value)
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_up_to_five_million() {
        let (display, amount) = parse_total("up to £5 million");
        assert_eq!(display.as_deref(), Some("up to £5 million"));
        assert_eq!(amount, Some(5_000_000));
    }

    #[test]
    fn total_preserves_matched_substring() {
        let (display, amount) = parse_total("Up to £5 million is available for this round");
        assert_eq!(display.as_deref(), Some("Up to £5 million"));
        assert_eq!(amount, Some(5_000_000));
    }

    #[test]
    fn total_formatted_plain_amount() {
        let (display, amount) = parse_total("a total pot of £250,000 will be awarded");
        assert_eq!(display.as_deref(), Some("£250,000"));
        assert_eq!(amount, Some(250_000));
    }

    #[test]
    fn total_range_takes_first_amount() {
        let (display, amount) = parse_total("£10 million to £15 million");
        assert_eq!(display.as_deref(), Some("£10 million to £15 million"));
        assert_eq!(amount, Some(10_000_000));
    }

    #[test]
    fn total_small_bare_amount_rejected() {
        assert_eq!(parse_total("you can apply for up to £4"), (None, None));
        assert_eq!(parse_total("no funding is mentioned here"), (None, None));
    }

    #[test]
    fn total_k_suffix() {
        let (_, amount) = parse_total("a fund of £750k for feasibility studies");
        assert_eq!(amount, Some(750_000));
    }

    #[test]
    fn project_range_with_commas() {
        let (min, max, display) = parse_project_range("£150,000 to £750,000");
        assert_eq!(min, Some(150_000));
        assert_eq!(max, Some(750_000));
        assert_eq!(display.as_deref(), Some("£150,000 to £750,000"));
    }

    #[test]
    fn project_between_form() {
        let (min, max, _) =
            parse_project_range("total costs must be between £1.5 million and £2 million");
        assert_eq!(min, Some(1_500_000));
        assert_eq!(max, Some(2_000_000));
    }

    #[test]
    fn project_between_display_synthesized() {
        let (_, _, display) = parse_project_range("between £1.5 million and £2 million");
        assert_eq!(display.as_deref(), Some("£1.5m to £2m"));
    }

    #[test]
    fn project_up_to_only_max() {
        let (min, max, display) = parse_project_range("up to £500,000");
        assert_eq!(min, None);
        assert_eq!(max, Some(500_000));
        assert_eq!(display.as_deref(), Some("up to £500,000"));
    }

    #[test]
    fn project_not_exceed() {
        let (min, max, _) = parse_project_range("your grant funding request must not exceed £2 million");
        assert_eq!(min, None);
        assert_eq!(max, Some(2_000_000));
    }

    #[test]
    fn project_single_bare_amount_is_max() {
        let (min, max, display) = parse_project_range("£600,000");
        assert_eq!(min, None);
        assert_eq!(max, Some(600_000));
        assert_eq!(display.as_deref(), Some("up to £600,000"));
    }

    #[test]
    fn project_no_amounts() {
        assert_eq!(parse_project_range("costs vary by project"), (None, None, None));
    }

    #[test]
    fn prize_pot_assumes_millions() {
        let (display, amount) = parse_prize("winners receive a share of a £1 million prize pot").unwrap();
        assert_eq!(display, "share of a £1 million prize pot");
        assert_eq!(amount, 1_000_000);
        let (_, bare) = parse_prize("a share of a £2 prize fund").unwrap();
        assert_eq!(bare, 2_000_000);
    }

    #[test]
    fn prize_per_award() {
        let (display, amount) = parse_prize("£250k each for the five best entries").unwrap();
        assert_eq!(display, "£250k each");
        assert_eq!(amount, 250_000);
        let (_, per_winner) = parse_prize("£1m per winner").unwrap();
        assert_eq!(per_winner, 1_000_000);
    }

    #[test]
    fn prize_absent() {
        assert!(parse_prize("an ordinary grant competition").is_none());
    }
}
