//! Selector expressions over a listed playlist
//!
//! Accepted forms, 1-based and validated against the list length:
//! `all`, single numbers (`1, 3 5`) and inclusive ranges (`2-6`), freely
//! combined with commas and/or whitespace.

use crate::utils::error::LoaderError;
use std::collections::BTreeSet;

/// Parse `expr` against a list of `len` entries into ascending, distinct,
/// 1-based indices.
///
/// A single bad token rejects the whole expression.
pub fn parse_selection(expr: &str, len: usize) -> Result<Vec<usize>, LoaderError> {
    let expr = expr.trim();

    if expr.eq_ignore_ascii_case("all") {
        return if len == 0 {
            Err(LoaderError::EmptySelection)
        } else {
            Ok((1..=len).collect())
        };
    }

    let mut indices = BTreeSet::new();

    for token in expr
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_index(token, start, len)?;
                let end = parse_index(token, end, len)?;
                if start > end {
                    return Err(invalid(token, "range start is after its end"));
                }
                indices.extend(start..=end);
            }
            None => {
                indices.insert(parse_index(token, token, len)?);
            }
        }
    }

    if indices.is_empty() {
        return Err(LoaderError::EmptySelection);
    }

    Ok(indices.into_iter().collect())
}

fn parse_index(token: &str, value: &str, len: usize) -> Result<usize, LoaderError> {
    let index: usize = value
        .parse()
        .map_err(|_| invalid(token, "expected a number, a range like 2-5, or 'all'"))?;

    if index == 0 || index > len {
        return Err(invalid(
            token,
            &format!("{} is outside 1-{}", index, len),
        ));
    }

    Ok(index)
}

fn invalid(token: &str, reason: &str) -> LoaderError {
    LoaderError::InvalidSelection {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_token(result: Result<Vec<usize>, LoaderError>) -> String {
        match result {
            Err(LoaderError::InvalidSelection { token, .. }) => token,
            other => panic!("expected InvalidSelection, got {:?}", other),
        }
    }

    #[test]
    fn test_all_selects_everything() {
        assert_eq!(parse_selection("all", 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(parse_selection("  ALL ", 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_numbers_and_ranges_combined() {
        assert_eq!(
            parse_selection("1, 3-5, 8, 10-12", 12).unwrap(),
            vec![1, 3, 4, 5, 8, 10, 11, 12]
        );
        assert_eq!(parse_selection("2 4\t6", 6).unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn test_duplicates_removed_and_sorted() {
        assert_eq!(parse_selection("5, 1-3, 2, 3-5", 5).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(parse_selection("3,1", 3).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_single_point_range() {
        assert_eq!(parse_selection("4-4", 5).unwrap(), vec![4]);
    }

    #[test]
    fn test_out_of_range_rejects_everything() {
        assert_eq!(invalid_token(parse_selection("1, 2, 9", 5)), "9");
        assert_eq!(invalid_token(parse_selection("0", 5)), "0");
        assert_eq!(invalid_token(parse_selection("2-6", 5)), "2-6");
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(invalid_token(parse_selection("1, x", 5)), "x");
        assert_eq!(invalid_token(parse_selection("-3", 5)), "-3");
        assert_eq!(invalid_token(parse_selection("2-", 5)), "2-");
        assert_eq!(invalid_token(parse_selection("1-2-3", 5)), "1-2-3");
        assert_eq!(invalid_token(parse_selection("4-2", 5)), "4-2");
        assert_eq!(invalid_token(parse_selection("all, 1", 5)), "all");
    }

    #[test]
    fn test_empty_is_distinct_from_invalid() {
        assert!(matches!(parse_selection("", 5), Err(LoaderError::EmptySelection)));
        assert!(matches!(parse_selection(" , ,", 5), Err(LoaderError::EmptySelection)));
        assert!(matches!(parse_selection("all", 0), Err(LoaderError::EmptySelection)));
    }
}
