//! "Did you mean" hints for unknown names
//!
//! Candidates are ranked by Levenshtein distance; anything further than
//! [`MAX_SUGGESTION_DISTANCE`] edits away is not worth suggesting.

/// Maximum Levenshtein distance to consider for suggestions
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Block types accepted at the top level of a module file
pub const TOP_LEVEL_BLOCKS: &[&str] = &[
    "kube_resource",
    "resource",
    "module",
    "variable",
    "locals",
    "default_annotations",
    "backend_storage",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub text: String,
    /// Levenshtein distance (lower = better match)
    pub distance: usize,
}

/// Find the closest candidates to `input`, best first
pub fn find_closest_matches<'a, I>(input: &str, candidates: I, max_results: usize) -> Vec<Suggestion>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut suggestions: Vec<Suggestion> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = strsim::levenshtein(input, candidate);
            (distance <= MAX_SUGGESTION_DISTANCE && distance > 0).then(|| Suggestion {
                text: candidate.to_string(),
                distance,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.text.cmp(&b.text)));
    suggestions.dedup_by(|a, b| a.text == b.text);
    suggestions.truncate(max_results);
    suggestions
}

/// ` Did you mean "x"?` or an empty string, ready to append to a detail
pub fn did_you_mean<'a, I>(input: &str, candidates: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    match find_closest_matches(input, candidates, 1).first() {
        Some(s) => format!(" Did you mean {:?}?", s.text),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_closest_matches() {
        let matches = find_closest_matches("lenght", ["length", "lower", "lookup"], 3);
        assert_eq!(matches[0].text, "length");
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_exact_match_is_not_a_suggestion() {
        assert!(find_closest_matches("module", TOP_LEVEL_BLOCKS.iter().copied(), 3).is_empty());
    }

    #[test]
    fn test_did_you_mean() {
        assert_eq!(
            did_you_mean("kube_resorce", TOP_LEVEL_BLOCKS.iter().copied()),
            " Did you mean \"kube_resource\"?"
        );
        assert_eq!(did_you_mean("zzzzzzzz", TOP_LEVEL_BLOCKS.iter().copied()), "");
    }
}
