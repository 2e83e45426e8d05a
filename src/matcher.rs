//! Directory search expression matching.
//!
//! Search expressions handed down with directory enumeration requests may
//! contain the classic wildcards `?` (exactly one character) and `*` (any run
//! of characters) as well as the DOS-style wildcards `<`, `>` and `"` the
//! kernel substitutes when matching legacy 8.3 masks. The matcher is used by
//! the dispatcher to filter plain directory listings when the filesystem does
//! not implement pattern-aware enumeration itself.

/// Matches zero or more characters up to the final dot of the name.
const DOS_STAR: char = '<';
/// Matches a single character, or nothing at a dot or at the end of the name.
const DOS_QM: char = '>';
/// Matches a dot, or nothing at the end of the name.
const DOS_DOT: char = '"';

/// Checks whether `name` matches the search expression.
///
/// The function is pure and total: it never fails, it returns `false` when
/// the name does not match. An empty expression matches only the empty name;
/// an empty name is matched only by `""` and `"*"`.
pub fn is_name_in_expression(expression: &str, name: &str, ignore_case: bool) -> bool {
    let expression: Vec<char> = fold_case(expression, ignore_case);
    let name: Vec<char> = fold_case(name, ignore_case);
    matches_at(&expression, &name)
}

fn fold_case(s: &str, ignore_case: bool) -> Vec<char> {
    if ignore_case {
        s.chars().flat_map(char::to_uppercase).collect()
    } else {
        s.chars().collect()
    }
}

fn matches_at(expression: &[char], name: &[char]) -> bool {
    let (wildcard, rest) = match expression.split_first() {
        Some((first, rest)) => (*first, rest),
        None => return name.is_empty(),
    };
    match wildcard {
        '*' => (0..=name.len()).any(|taken| matches_at(rest, &name[taken..])),
        DOS_STAR => {
            // A DOS star consumes characters only up to the final dot, so a
            // trailing "<" still matches a name without an extension.
            let final_dot = name.iter().rposition(|&c| c == '.');
            let limit = final_dot.unwrap_or(name.len());
            (0..=limit).any(|taken| matches_at(rest, &name[taken..]))
                || matches_at(rest, &name[name.len()..])
        }
        DOS_QM => match name.first() {
            Some('.') | None => matches_at(rest, name),
            Some(_) => matches_at(rest, &name[1..]),
        },
        DOS_DOT => match name.first() {
            Some('.') => matches_at(rest, &name[1..]),
            None => matches_at(rest, name),
            Some(_) => false,
        },
        '?' => !name.is_empty() && matches_at(rest, &name[1..]),
        literal => match name.first() {
            Some(&c) if c == literal => matches_at(rest, &name[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn star_matches_everything() {
        for name in ["", "a", "foo.txt", "no extension", ".hidden"].iter() {
            assert!(is_name_in_expression("*", name, false));
            assert!(is_name_in_expression("*", name, true));
        }
    }

    #[test]
    fn empty_expression_matches_only_empty_name() {
        assert!(is_name_in_expression("", "", false));
        assert!(!is_name_in_expression("", "a", false));
        assert!(!is_name_in_expression("a", "", false));
        assert!(!is_name_in_expression("?", "", false));
    }

    #[test]
    fn question_mark_matches_exactly_one_character() {
        assert!(is_name_in_expression("a?c", "abc", false));
        assert!(is_name_in_expression("a?c", "axc", false));
        assert!(!is_name_in_expression("a?c", "ac", false));
        assert!(!is_name_in_expression("a?c", "abbc", false));
    }

    #[test]
    fn case_sensitivity() {
        assert!(is_name_in_expression("a?c", "abC", true));
        assert!(!is_name_in_expression("a?c", "abC", false));
        assert!(is_name_in_expression("FOO.*", "foo.txt", true));
        assert!(!is_name_in_expression("FOO.*", "foo.txt", false));
    }

    #[test]
    fn multi_char_uppercase_expansions_fold_completely() {
        // U+00DF uppercases to "SS".
        assert!(is_name_in_expression("STRASSE", "stra\u{df}e", true));
        assert!(is_name_in_expression("stra\u{df}e", "STRASSE", true));
        assert!(!is_name_in_expression("stra\u{df}e", "STRASSE", false));
    }

    #[test]
    fn star_in_the_middle() {
        assert!(is_name_in_expression("a*c", "ac", false));
        assert!(is_name_in_expression("a*c", "abbbc", false));
        assert!(!is_name_in_expression("a*c", "abbb", false));
        assert!(is_name_in_expression("*.txt", "notes.txt", false));
        assert!(!is_name_in_expression("*.txt", "notes.log", false));
    }

    #[test]
    fn dos_star_stops_at_the_final_dot() {
        assert!(is_name_in_expression("<.txt", "a.txt", false));
        assert!(is_name_in_expression("<.txt", "a.b.txt", false));
        assert!(!is_name_in_expression("<.txt", "a.txt.log", false));
    }

    #[test]
    fn dos_star_matches_empty_extension() {
        // "*.*" as converted for legacy 8.3 matching must accept names
        // without any extension at all.
        assert!(is_name_in_expression("<\"<", "foo", false));
        assert!(is_name_in_expression("<\"<", "foo.txt", false));
        assert!(is_name_in_expression("<\"<", "foo.tar.gz", false));
    }

    #[test]
    fn dos_dot_matches_dot_or_end() {
        assert!(is_name_in_expression("foo\"", "foo.", false));
        assert!(is_name_in_expression("foo\"", "foo", false));
        assert!(!is_name_in_expression("foo\"", "foox", false));
    }

    #[test]
    fn dos_qm_skips_at_dot_and_end() {
        assert!(is_name_in_expression("a>", "ab", false));
        assert!(is_name_in_expression("a>", "a", false));
        assert!(is_name_in_expression("a>.txt", "a.txt", false));
        assert!(is_name_in_expression("a>.txt", "ab.txt", false));
        assert!(!is_name_in_expression("a>.txt", "abc.txt", false));
    }

    #[test]
    fn literal_names() {
        assert!(is_name_in_expression("pagefile.sys", "pagefile.sys", false));
        assert!(!is_name_in_expression("pagefile.sys", "pagefile.sy", false));
        assert!(is_name_in_expression("PAGEFILE.SYS", "pagefile.sys", true));
    }
}
