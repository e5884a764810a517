use crate::extract::dom::fragment_text;

pub const MIN_BLOCK_CHARS: usize = 80;
pub const MAX_SELECTED_BLOCKS: usize = 3;

const POSITIVE_KEYWORDS: &[&str] = &[
    "anwendung",
    "dosierung",
    "inhalt",
    "zusammensetzung",
    "npk",
    "gebrauchsanweisung",
    "analyse",
    "hinweis",
    "eigenschaften",
    "beschreibung",
    "produktbeschreibung",
];

/// Navigation and marketing boilerplate; any hit excludes the block outright.
const BOILERPLATE_PHRASES: &[&str] = &[
    "menü schließen",
    "menü schliessen",
    "weiterlesen",
    "ähnliche produkte",
    "related products",
    "you may also like",
    "newsletter",
    "breadcrumb",
    "warenkorb",
    "shop",
    "kategorie",
    "filter",
];

/// Names of sibling products whose copy tends to bleed into a page.
pub const SIBLING_PRODUCT_KEYWORDS: &[&str] =
    &["root", "supervit", "hydro", "blüh", "bloom", "coco", "kokos", "complex"];

/// Relevance of one block, or `None` when it is too short or boilerplate.
pub fn score_block(block: &str, brand: &str, name: &str) -> Option<i32> {
    let text = fragment_text(block).to_lowercase();
    let len = text.chars().count();
    if len < MIN_BLOCK_CHARS {
        return None;
    }
    if BOILERPLATE_PHRASES.iter().any(|phrase| text.contains(phrase)) {
        return None;
    }

    let brand = brand.trim().to_lowercase();
    let name = name.trim().to_lowercase();
    let mut score = (len / 120).min(10) as i32;
    if !brand.is_empty() && text.contains(&brand) {
        score += 5;
    }
    if !name.is_empty() && text.contains(&name) {
        score += 6;
    }
    score += 2 * POSITIVE_KEYWORDS
        .iter()
        .filter(|keyword| text.contains(*keyword))
        .count() as i32;

    let own = format!("{brand} {name}");
    let siblings = SIBLING_PRODUCT_KEYWORDS
        .iter()
        .filter(|keyword| !own.contains(*keyword) && text.contains(*keyword))
        .count();
    if siblings >= 2 {
        score -= 6;
    }
    Some(score)
}

/// Up to three positively scored blocks, best first. With none, the first block.
pub fn select_blocks<'a>(blocks: &'a [String], brand: &str, name: &str) -> Vec<&'a String> {
    let mut scored: Vec<(i32, &String)> = blocks
        .iter()
        .filter_map(|block| score_block(block, brand, name).map(|score| (score, block)))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    let selected: Vec<&String> = scored
        .into_iter()
        .take(MAX_SELECTED_BLOCKS)
        .map(|(_, block)| block)
        .collect();
    if selected.is_empty() {
        blocks.iter().take(1).collect()
    } else {
        selected
    }
}
