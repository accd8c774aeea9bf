//! Flattens a publication's multi-locale metadata graph into index fields.
//!
//! Locale variants are merged in sorted-locale order, markup is stripped and
//! whitespace collapsed, so normalizing the same metadata state twice yields
//! identical strings.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::search::dao::RecordFields;
use crate::{Author, Localized, LocalizedList, Publication};

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid markup pattern"));

/// Normalize the current publication into the flat field set stored by the
/// index.
///
/// Every metadata field is produced (possibly empty) so a reindex overwrites
/// stale values; `galley_text` is never touched by metadata normalization.
pub fn normalize(publication: &Publication) -> RecordFields {
    RecordFields {
        title: Some(full_titles(publication)),
        abstract_text: Some(flatten_localized(&publication.abstract_text)),
        authors: Some(flatten_authors(&publication.authors)),
        keywords: Some(flatten_localized_list(&publication.keywords)),
        subjects: Some(flatten_localized_list(&publication.subjects)),
        disciplines: Some(flatten_localized_list(&publication.disciplines)),
        coverage: Some(
            publication.coverage.as_deref().and_then(clean).unwrap_or_default(),
        ),
        submission_type: Some(
            publication.submission_type.as_deref().and_then(clean).unwrap_or_default(),
        ),
        galley_text: None,
    }
}

/// Strip markup, collapse whitespace and trim; `None` when nothing remains.
fn clean(value: &str) -> Option<String> {
    let stripped = MARKUP.replace_all(value, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn join_cleaned<'a, I: IntoIterator<Item = &'a str>>(values: I) -> String {
    values
        .into_iter()
        .filter_map(clean)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title and subtitle merged per locale, then flattened across locales.
fn full_titles(publication: &Publication) -> String {
    let mut locales: Vec<&String> = publication
        .title
        .keys()
        .chain(publication.subtitle.keys())
        .collect();
    locales.sort();
    locales.dedup();

    let mut parts: Vec<&str> = Vec::new();
    for locale in locales {
        if let Some(title) = publication.title.get(locale) {
            parts.push(title);
        }
        if let Some(subtitle) = publication.subtitle.get(locale) {
            parts.push(subtitle);
        }
    }
    join_cleaned(parts)
}

fn flatten_localized(values: &Localized) -> String {
    join_cleaned(values.values().map(String::as_str))
}

fn flatten_localized_list(values: &LocalizedList) -> String {
    join_cleaned(values.values().flatten().map(String::as_str))
}

/// Given name, family name, preferred public name and affiliation of every
/// author, merged across locales.
fn flatten_authors(authors: &[Author]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for author in authors {
        parts.extend(author.given_name.values().map(String::as_str));
        parts.extend(author.family_name.values().map(String::as_str));
        parts.extend(author.preferred_public_name.values().map(String::as_str));
        parts.extend(author.affiliation.values().map(String::as_str));
    }
    join_cleaned(parts)
}
