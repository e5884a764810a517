use whatlang::Lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    German,
    Other(&'static str),
    Unknown,
}

/// Language of `text`; unreliable guesses come back as `Unknown`.
pub fn detect_language(text: &str) -> Detected {
    match whatlang::detect(text) {
        Some(info) if info.is_reliable() => match info.lang() {
            Lang::Deu => Detected::German,
            other => Detected::Other(other.code()),
        },
        _ => Detected::Unknown,
    }
}
