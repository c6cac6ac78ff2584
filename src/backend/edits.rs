//! Pure editing and searching primitives over file contents.

use regex::RegexBuilder;

use crate::error::EditError;

/// Replace `old` with `new` in `content`.
///
/// Without `replace_all`, `old` must occur exactly once. Returns the new
/// content and the number of replacements made.
pub fn apply_edit(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, u32), EditError> {
    if old.is_empty() {
        return Err(EditError::EmptyOldString);
    }
    if old == new {
        return Err(EditError::NoChange);
    }
    let occurrences = content.matches(old).count();
    if occurrences == 0 {
        return Err(EditError::OldNotFound);
    }
    if replace_all {
        Ok((content.replace(old, new), occurrences as u32))
    } else {
        if occurrences != 1 {
            return Err(EditError::OldNotUnique(occurrences));
        }
        Ok((content.replacen(old, new, 1), 1))
    }
}

/// Options for [structural_grep].
#[derive(Clone, Debug, Default)]
pub struct GrepFlags {
    pub case_insensitive: bool,
    /// Stop after this many hits.
    pub max_hits: Option<usize>,
}

/// Line-oriented regex search. Returns `(line_no, line)` pairs with 1-based
/// line numbers, in input order. Works on a single pass over the lines so it
/// composes with streaming callers.
pub fn structural_grep(
    content: &str,
    pattern: &str,
    flags: &GrepFlags,
) -> Result<Vec<(u32, String)>, regex::Error> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(flags.case_insensitive)
        .build()?;
    let mut hits = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if re.is_match(line) {
            hits.push(((idx + 1) as u32, line.to_string()));
            if let Some(max) = flags.max_hits {
                if hits.len() >= max {
                    break;
                }
            }
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_unique_occurrence() {
        let (out, n) = apply_edit("foo bar", "foo", "baz", false).unwrap();
        assert_eq!(out, "baz bar");
        assert_eq!(n, 1);
    }

    #[test]
    fn edit_rejects_non_unique_without_replace_all() {
        assert_eq!(
            apply_edit("foo foo", "foo", "bar", false),
            Err(EditError::OldNotUnique(2))
        );
        let (out, n) = apply_edit("foo foo", "foo", "bar", true).unwrap();
        assert_eq!(out, "bar bar");
        assert_eq!(n, 2);
    }

    #[test]
    fn edit_rejects_degenerate_inputs() {
        assert_eq!(apply_edit("x", "", "y", false), Err(EditError::EmptyOldString));
        assert_eq!(apply_edit("x", "a", "a", false), Err(EditError::NoChange));
        assert_eq!(apply_edit("x", "z", "y", false), Err(EditError::OldNotFound));
    }

    #[test]
    fn grep_is_line_oriented_with_flags() {
        let content = "alpha\nBeta\nbeta gamma\n";
        let hits = structural_grep(content, "beta", &GrepFlags::default()).unwrap();
        assert_eq!(hits, vec![(3, "beta gamma".to_string())]);

        let hits = structural_grep(
            content,
            "beta",
            &GrepFlags {
                case_insensitive: true,
                max_hits: Some(1),
            },
        )
        .unwrap();
        assert_eq!(hits, vec![(2, "Beta".to_string())]);
    }
}
