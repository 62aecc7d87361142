//! Glob matching for `string match`, `switch -glob`, `lsearch`, the
//! `=*` expression operator and the `info`/`dict` pattern filters.
//!
//! Syntax:
//!
//! ```text
//! *        — any sequence of characters, including none
//! ?        — any single character
//! [...]    — character set; `a-z` ranges, `[^...]` negated
//! \x       — literal x
//! ```
//!
//! Matching works on chars, so `?` consumes one full Unicode scalar.

/// Returns true if `text` matches `pattern`.
pub fn glob_match(pattern: &str, text: &str, nocase: bool) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = text.chars().collect();
    smatch(&p, &s, nocase)
}

fn fold(c: char, nocase: bool) -> char {
    if nocase {
        c.to_lowercase().next().unwrap_or(c)
    } else {
        c
    }
}

/// Matches with a single backtrack point: the most recent `*`.  Glob has
/// no alternation, so retrying only the last star is complete and keeps
/// the cost at O(pattern × text).
fn smatch(pat: &[char], s: &[char], nocase: bool) -> bool {
    let (mut pi, mut si) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while si < s.len() {
        if pi < pat.len() {
            if pat[pi] == '*' {
                star = Some((pi + 1, si));
                pi += 1;
                continue;
            }
            if let Some(next) = step(pat, pi, s[si], nocase) {
                pi = next;
                si += 1;
                continue;
            }
        }
        match star {
            Some((resume, from)) => {
                pi = resume;
                si = from + 1;
                star = Some((resume, from + 1));
            }
            None => return false,
        }
    }
    pat[pi..].iter().all(|&c| c == '*')
}

/// Matches one text char against the pattern element at `pi`, returning
/// the index of the next element.
fn step(pat: &[char], pi: usize, c: char, nocase: bool) -> Option<usize> {
    match pat[pi] {
        '?' => Some(pi + 1),
        '[' => {
            let (matched, rest) = match_set(&pat[pi + 1..], c, nocase);
            matched.then(|| pat.len() - rest.len())
        }
        '\\' if pi + 1 < pat.len() => {
            (fold(pat[pi + 1], nocase) == fold(c, nocase)).then_some(pi + 2)
        }
        p => (fold(p, nocase) == fold(c, nocase)).then_some(pi + 1),
    }
}

/// Matches `c` against the set body that follows `[`.  Returns the outcome
/// and the pattern remaining after the closing `]` (or the end of the
/// pattern if the set is unterminated).
fn match_set(mut pat: &[char], c: char, nocase: bool) -> (bool, &[char]) {
    let negate = pat.first() == Some(&'^');
    if negate {
        pat = &pat[1..];
    }
    let c = fold(c, nocase);
    let mut matched = false;
    let mut first = true;
    while let Some(&start) = pat.first() {
        if start == ']' && !first {
            pat = &pat[1..];
            return (matched != negate, pat);
        }
        first = false;
        let (start, used) = if start == '\\' && pat.len() > 1 {
            (pat[1], 2)
        } else {
            (start, 1)
        };
        pat = &pat[used..];
        if pat.len() > 1 && pat[0] == '-' && pat[1] != ']' {
            let end = pat[1];
            pat = &pat[2..];
            let (lo, hi) = {
                let (a, b) = (fold(start, nocase), fold(end, nocase));
                if a <= b { (a, b) } else { (b, a) }
            };
            if lo <= c && c <= hi {
                matched = true;
            }
        } else if fold(start, nocase) == c {
            matched = true;
        }
    }
    (matched != negate, pat)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_and_question() {
        assert!(glob_match("a*c", "abbbc", false));
        assert!(glob_match("a*", "a", false));
        assert!(glob_match("*", "", false));
        assert!(glob_match("a?c", "abc", false));
        assert!(!glob_match("a?c", "ac", false));
        assert!(!glob_match("a*d", "abc", false));
    }

    #[test]
    fn sets_and_ranges() {
        assert!(glob_match("[abc]x", "bx", false));
        assert!(glob_match("[a-z]1", "q1", false));
        assert!(glob_match("[z-a]1", "q1", false));
        assert!(!glob_match("[a-c]", "d", false));
        assert!(glob_match("[^a-c]", "d", false));
        assert!(glob_match("[]]", "]", false));
    }

    #[test]
    fn escapes_and_case() {
        assert!(glob_match("a\\*", "a*", false));
        assert!(!glob_match("a\\*", "ab", false));
        assert!(glob_match("HELLO*", "hello world", true));
        assert!(!glob_match("HELLO*", "hello world", false));
    }

    #[test]
    fn unicode_question_mark() {
        assert!(glob_match("?b", "éb", false));
    }

    #[test]
    fn pathological_pattern_terminates() {
        let text = "a".repeat(60);
        assert!(!glob_match("*a*a*a*a*a*a*a*b", &text, false));
    }
}
