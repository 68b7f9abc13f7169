//! Glob-style domain matching.
//!
//! `*` matches any run of characters, dots included. Matching is anchored at
//! both ends and ASCII case-insensitive. The lone pattern `*` matches every
//! domain.

/// Returns true if `domain` matches `pattern`.
pub fn is_match(pattern: &str, domain: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    glob(pattern.as_bytes(), domain.as_bytes())
}

/// Iterative glob with single-star backtracking. Linear in practice, never
/// worse than `O(pattern * input)`.
fn glob(pattern: &[u8], input: &[u8]) -> bool {
    let (mut p, mut i) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while i < input.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            p += 1;
            resume = i;
        } else if p < pattern.len() && pattern[p].eq_ignore_ascii_case(&input[i]) {
            p += 1;
            i += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            i = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}
