use std::collections::HashSet;

/// Trim every value, drop blanks and keep the first spelling of values that
/// are equal ignoring case. Input order is preserved.
pub(crate) fn dedupe_ignore_case<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter_map(|v| {
            let trimmed = v.as_ref().trim();
            (!trimmed.is_empty() && seen.insert(trimmed.to_lowercase()))
                .then(|| trimmed.to_owned())
        })
        .collect()
}
