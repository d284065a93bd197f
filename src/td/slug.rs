//! Slug normalization for interaction names and Thing URL paths.

/// Turns an arbitrary string into a stable URL-safe slug: lowercase, with
/// every run of non-alphanumeric characters collapsed into a single `-`.
///
/// Interaction names (`[A-Za-z0-9_-]+`) slug to their lowercase form with
/// `_` replaced by `-`; Thing ids slug to a path segment, e.g.
/// `urn:example:org` becomes `urn-example-org`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}
