// src/detectors/edit_distance.rs

/// Levenshtein distance over chars: minimum single-char inserts, deletes and
/// substitutions turning `a` into `b`. Full (m+1)×(n+1) table.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());

    let mut table = vec![vec![0usize; n + 1]; m + 1];
    for (i, row) in table.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=n {
        table[0][j] = j;
    }

    for i in 1..=m {
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            table[i][j] = (table[i - 1][j] + 1)
                .min(table[i][j - 1] + 1)
                .min(table[i - 1][j - 1] + cost);
        }
    }
    table[m][n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_distances() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("admin", "adm1n"), 1);
        assert_eq!(levenshtein("admin", "admins"), 1);
        assert_eq!(levenshtein("admin", "dmin"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        // Cyrillic 'а' is two bytes but one edit
        assert_eq!(levenshtein("admin", "аdmin"), 1);
        assert_eq!(levenshtein("żółw", "zolw"), 3);
    }

    proptest! {
        #[test]
        fn symmetric(a in "\\PC{0,12}", b in "\\PC{0,12}") {
            prop_assert_eq!(levenshtein(&a, &b), levenshtein(&b, &a));
        }

        #[test]
        fn identity_is_zero(a in "\\PC{0,16}") {
            prop_assert_eq!(levenshtein(&a, &a), 0);
        }

        #[test]
        fn bounded_by_longer_length(a in "[a-z0-9_]{0,12}", b in "\\PC{0,12}") {
            let bound = a.chars().count().max(b.chars().count());
            prop_assert!(levenshtein(&a, &b) <= bound);
        }

        #[test]
        fn at_least_length_difference(a in "[a-z]{0,10}", b in "[a-z]{0,10}") {
            let diff = a.len().abs_diff(b.len());
            prop_assert!(levenshtein(&a, &b) >= diff);
        }
    }
}
