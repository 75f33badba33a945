use url::Url;

/// Query parameter whose value is masked before persisting to telemetry.
const SENSITIVE_PARAM: &str = "key";

const MASK: &str = "*********";

/// Obfuscate the `key` query parameter of an absolute URL, returning
/// the full serialized URL.
///
/// `None` and the empty string pass through unchanged, as does any
/// input that fails to parse as an absolute URL. This never fails.
pub fn obfuscate_url(url: Option<&str>) -> Option<String> {
    let raw = url?;
    match parse_and_mask(raw) {
        Some(masked) => Some(masked.to_string()),
        None => Some(raw.to_string()),
    }
}

/// Same masking as [`obfuscate_url`] but returns only `{path}{?query}`,
/// dropping scheme and host.
pub fn obfuscate_path(url: Option<&str>) -> Option<String> {
    let raw = url?;
    match parse_and_mask(raw) {
        Some(masked) => {
            let query = masked
                .query()
                .map(|q| format!("?{}", q))
                .unwrap_or_default();
            Some(format!("{}{}", masked.path(), query))
        }
        None => Some(raw.to_string()),
    }
}

fn parse_and_mask(raw: &str) -> Option<Url> {
    if raw.is_empty() {
        return None;
    }
    let parsed = Url::parse(raw).ok()?;
    if !parsed
        .query_pairs()
        .any(|(name, _)| name == SENSITIVE_PARAM)
    {
        return Some(parsed);
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            let value = if name == SENSITIVE_PARAM {
                mask_value(&value)
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();

    let mut masked = parsed.clone();
    masked
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())));
    Some(masked)
}

// Values longer than 4 characters keep their last 4 characters for
// support correlation; anything shorter is masked entirely. Length is
// counted in characters, never bytes, so multibyte values stay safe.
fn mask_value(value: &str) -> String {
    let suffix: String = if value.trim().chars().count() > 4 {
        let chars: Vec<char> = value.chars().collect();
        chars[chars.len() - 4..].iter().collect()
    } else {
        "****".to_string()
    };
    format!("{}{}", MASK, suffix)
}
