use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+[.,]?\d*)\s*(ml|l)\b").expect("size regex"));
static UNIT_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)\s*(ml|l)\b").expect("unit gap regex"));
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex"));

/// Pack sizes (in millilitres) that commonly show up in storefront filenames.
pub const DEFAULT_PACK_SIZES_ML: &[u32] = &[
    10, 20, 50, 100, 250, 500, 1000, 1500, 2000, 2500, 5000, 10000,
];

pub fn slugify(value: &str) -> String {
    NON_ALNUM_RE
        .replace_all(&value.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Lowercase alphanumeric tokens; every other run of characters separates.
pub fn split_tokens(value: &str) -> Vec<String> {
    NON_ALNUM_RE
        .split(&value.to_lowercase())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Distinct tokens across every spelling of a variant label, so `500 ml` also yields
/// the `0`, `5` and `l` of `0,5 l`.
pub fn variant_tokens(value: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    split_tokens(&variant_synonyms(value).join(" "))
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Parses the first `<number><unit>` pair (unit `ml` or `l`) into millilitres.
pub fn parse_size_ml(value: &str) -> Option<u32> {
    let lowered = value.to_lowercase();
    let caps = SIZE_RE.captures(&lowered)?;
    let number = caps[1].replace(',', ".").parse::<f64>().ok()?;
    let ml = match &caps[2] {
        "l" => number * 1000.0,
        _ => number,
    };
    if ml <= 0.0 || !ml.is_finite() {
        return None;
    }
    Some(ml.round() as u32)
}

/// Shortest decimal litre spelling for a millilitre amount (`500` -> `0.5`, `1000` -> `1`).
pub fn litre_repr(ml: u32) -> String {
    let whole = ml / 1000;
    let frac = ml % 1000;
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{frac:03}").trim_end_matches('0').to_string()
    }
}

/// All spellings of a variant label that a storefront might use.
///
/// The input itself is always part of the result, even when it carries no size.
pub fn variant_synonyms(value: &str) -> Vec<String> {
    let lowered = value.trim().to_lowercase();
    let mut out = BTreeSet::new();
    if !value.trim().is_empty() {
        out.insert(value.to_string());
    }
    out.insert(lowered.clone());
    out.insert(lowered.replace(',', "."));
    out.insert(UNIT_GAP_RE.replace_all(&lowered, "$1 $2").into_owned());
    out.insert(lowered.replace(' ', ""));

    if let Some(caps) = SIZE_RE.captures(&lowered) {
        let raw = caps[1].replace(',', ".");
        let unit = caps[2].to_string();
        if let Some(ml) = parse_size_ml(&lowered) {
            out.insert(format!("{ml} ml"));
            out.insert(format!("{ml}ml"));
            if unit == "l" {
                out.insert(format!("{raw}l"));
                out.insert(format!("{raw} l"));
                out.insert(format!("{} l", raw.replace('.', ",")));
            }
            if ml >= 100 {
                insert_litre_spellings(&mut out, ml);
            }
        }
    }

    if lowered.contains("0,5") || lowered.contains("0.5") {
        insert_litre_spellings(&mut out, 500);
        out.insert("500 ml".into());
        out.insert("500ml".into());
    }

    out.into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn insert_litre_spellings(out: &mut BTreeSet<String>, ml: u32) {
    let dot = litre_repr(ml);
    let comma = dot.replace('.', ",");
    for spelling in [&dot, &comma] {
        out.insert(format!("{spelling} l"));
        out.insert(format!("{spelling}l"));
    }
}

/// Substring match that refuses to start or end inside an alphanumeric run,
/// so `500ml` is not found in `1500ml`.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    haystack.match_indices(term).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Filename matchers for the target pack size and for every other known size.
///
/// Heuristic only: a filename can encode sizes in ways none of these catch.
#[derive(Debug, Clone, Default)]
pub struct SizePatterns {
    pub good: Vec<Regex>,
    pub bad: Vec<Regex>,
}

impl SizePatterns {
    pub fn matches_target(&self, filename: &str) -> bool {
        self.good.iter().any(|re| re.is_match(filename))
    }

    pub fn matches_other(&self, filename: &str) -> bool {
        self.bad.iter().any(|re| re.is_match(filename))
    }
}

pub fn size_patterns(variant: &str, known_sizes_ml: &[u32]) -> SizePatterns {
    let target = parse_size_ml(variant);
    let good = target.map(patterns_for_size).unwrap_or_default();
    let bad = known_sizes_ml
        .iter()
        .copied()
        .filter(|ml| Some(*ml) != target)
        .flat_map(patterns_for_size)
        .collect();
    SizePatterns { good, bad }
}

fn patterns_for_size(ml: u32) -> Vec<Regex> {
    let mut sources = vec![format!(r"(?:^|[_\-]){ml}\s*ml(?:[^0-9]|$)")];
    if ml >= 100 {
        let one_decimal = format!("{:.1}", f64::from(ml) / 1000.0).replace('.', "[.,]");
        sources.push(format!(r"(?:^|[_\-]){one_decimal}\s*l(?:[^0-9]|$)"));
        let shortest = litre_repr(ml).replace('.', "[.,]");
        if shortest != one_decimal {
            sources.push(format!(r"(?:^|[_\-]){shortest}\s*l(?:[^0-9]|$)"));
        }
    }
    sources
        .iter()
        .filter_map(|source| Regex::new(source).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Hesi Boost 500 ml"), "hesi-boost-500-ml");
        assert_eq!(slugify("  --Bio·Grow!! "), "bio-grow");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn variant_tokens_cover_every_spelling() {
        let tokens = variant_tokens("0,5 l");
        for expected in ["500", "ml", "0", "5", "l"] {
            assert!(tokens.contains(&expected.to_string()), "missing {expected}");
        }
        let unique: BTreeSet<&String> = tokens.iter().collect();
        assert_eq!(unique.len(), tokens.len());
    }

    #[test]
    fn split_tokens_lowercases() {
        assert_eq!(split_tokens("Hesi PK-13/14"), vec!["hesi", "pk", "13", "14"]);
        assert!(split_tokens("--").is_empty());
    }

    #[test]
    fn half_litre_labels_share_spellings() {
        for label in ["500 ml", "500ml", "0,5 l", "0.5l", "0,5 L", "500 ML"] {
            let synonyms = variant_synonyms(label);
            for expected in ["0,5 l", "0.5 l", "500 ml"] {
                assert!(
                    synonyms.iter().any(|s| s == expected),
                    "{label} is missing {expected}: {synonyms:?}"
                );
            }
        }
    }

    #[test]
    fn litre_labels_gain_millilitres() {
        let synonyms = variant_synonyms("1 l");
        assert!(synonyms.contains(&"1000 ml".to_string()));
        assert!(synonyms.contains(&"1000ml".to_string()));
        assert!(synonyms.contains(&"1l".to_string()));
    }

    #[test]
    fn label_without_size_is_kept() {
        let synonyms = variant_synonyms("Bulk");
        assert!(synonyms.contains(&"Bulk".to_string()));
        assert!(synonyms.contains(&"bulk".to_string()));
    }

    #[test]
    fn parse_size_handles_both_units() {
        assert_eq!(parse_size_ml("0,5 l"), Some(500));
        assert_eq!(parse_size_ml("Flasche 250ml"), Some(250));
        assert_eq!(parse_size_ml("5L"), Some(5000));
        assert_eq!(parse_size_ml("large"), None);
    }

    #[test]
    fn litre_repr_trims_zeros() {
        assert_eq!(litre_repr(500), "0.5");
        assert_eq!(litre_repr(1000), "1");
        assert_eq!(litre_repr(250), "0.25");
        assert_eq!(litre_repr(1500), "1.5");
    }

    #[test]
    fn contains_term_respects_boundaries() {
        assert!(contains_term("hesi-boost-500ml.jpg", "500ml"));
        assert!(!contains_term("hesi-boost-1500ml.jpg", "500ml"));
        assert!(contains_term("flasche 0,5 l", "0,5 l"));
        assert!(!contains_term("bulk", ""));
    }

    #[test]
    fn size_patterns_split_target_from_others() {
        let patterns = size_patterns("500 ml", DEFAULT_PACK_SIZES_ML);
        assert!(patterns.matches_target("hesi-boost-500ml.jpg"));
        assert!(patterns.matches_target("hesi_boost_0,5l.png"));
        assert!(!patterns.matches_other("hesi-boost-500ml.jpg"));
        assert!(patterns.matches_other("hesi-boost-1000ml.jpg"));
        assert!(patterns.matches_other("hesi-boost-1l.jpg"));
        assert!(!patterns.matches_target("hesi-boost-1000ml.jpg"));
    }

    #[test]
    fn size_patterns_without_target_only_penalize() {
        let patterns = size_patterns("Bulk", DEFAULT_PACK_SIZES_ML);
        assert!(patterns.good.is_empty());
        assert!(patterns.matches_other("x-500ml.jpg"));
    }
}
