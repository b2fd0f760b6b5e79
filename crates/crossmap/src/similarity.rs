//! Graded string similarity on a 0–100 scale.

/// Normalized Indel similarity: `100 * 2 * LCS(a, b) / (|a| + |b|)`.
///
/// Compared over chars, case-sensitive. Two empty strings score 100.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = lcs_len(&a, &b);
    100.0 * (2 * lcs) as f64 / total as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Best-scoring choice for `query`. Ties keep the earliest choice.
pub fn extract_one<'a, I>(query: &str, choices: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, f64)> = None;
    for choice in choices {
        let score = ratio(query, choice);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((choice, score));
            if score >= 100.0 {
                break;
            }
        }
    }
    best
}

/// Best choice scoring at least `threshold`.
pub fn extract_above<'a, I>(query: &str, choices: I, threshold: f64) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    extract_one(query, choices).filter(|(_, score)| *score >= threshold)
}
