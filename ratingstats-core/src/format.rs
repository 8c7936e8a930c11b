//! Formatting helpers shared by exports, the API layer and the CLI.

/// Format a number the way rating values are shown to people.
///
/// Integral values drop the fractional part (`5`, not `5.0`).
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Avoid "-0"
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Format an optional number, or an empty string if missing.
pub fn format_number_opt(value: Option<f64>) -> String {
    value.map(format_number).unwrap_or_default()
}

/// Lowercase a display string and replace whitespace with dashes.
///
/// Used for export filenames ("Rating Fields" -> "rating-fields").
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = false;
    for c in text.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Naive English plural for display names ("Rating Field" -> "Rating Fields").
pub fn pluralize(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.ends_with('s') {
        trimmed.to_string()
    } else if let Some(stem) = trimmed
        .strip_suffix('y')
        .filter(|stem| !stem.ends_with(['a', 'e', 'i', 'o', 'u']))
    {
        format!("{stem}ies")
    } else {
        format!("{trimmed}s")
    }
}
