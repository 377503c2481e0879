//! String similarity and phonetic primitives shared by the normalizer and
//! the fuzzy matcher.

/// Levenshtein edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Levenshtein similarity ratio in [0, 1]; 1 is identical.
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Jaro-Winkler similarity in [0, 1]. Prefix scaling 0.1, max prefix 4.
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let match_distance = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matches = vec![false; a.len()];
    let mut b_matches = vec![false; b.len()];
    let mut matches = 0usize;

    for i in 0..a.len() {
        let start = i.saturating_sub(match_distance);
        let end = (i + match_distance + 1).min(b.len());
        for j in start..end {
            if b_matches[j] || a[i] != b[j] {
                continue;
            }
            a_matches[i] = true;
            b_matches[j] = true;
            matches += 1;
            break;
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut k = 0usize;
    for i in 0..a.len() {
        if !a_matches[i] {
            continue;
        }
        while !b_matches[k] {
            k += 1;
        }
        if a[i] != b[k] {
            transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let jaro =
        (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64 / 2.0) / m) / 3.0;

    let prefix = a
        .iter()
        .zip(b.iter())
        .take_while(|(x, y)| x == y)
        .count()
        .min(4);

    jaro + prefix as f64 * 0.1 * (1.0 - jaro)
}

/// Jaccard similarity of two token sets.
pub fn token_jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::BTreeSet;
    let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

/// Soundex code, four characters, padded with zeros.
pub fn soundex(name: &str) -> String {
    let letters: Vec<char> = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return "0000".to_string();
    }

    let code_of = |c: char| -> char {
        match c {
            'B' | 'F' | 'P' | 'V' => '1',
            'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => '2',
            'D' | 'T' => '3',
            'L' => '4',
            'M' | 'N' => '5',
            'R' => '6',
            _ => '0',
        }
    };

    let mut result = String::new();
    result.push(letters[0]);
    let mut last_code = code_of(letters[0]);

    for &c in &letters[1..] {
        let code = code_of(c);
        if code != '0' && code != last_code {
            result.push(code);
            if result.len() == 4 {
                break;
            }
        }
        if code != '0' {
            last_code = code;
        }
    }

    while result.len() < 4 {
        result.push('0');
    }
    result
}

/// Simplified Metaphone-style code: collapse runs, common digraph
/// substitutions, strip non-leading vowels, pad to four.
pub fn metaphone(name: &str) -> String {
    let letters: String = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return String::new();
    }

    let mut collapsed = String::new();
    for c in letters.chars() {
        if collapsed.chars().last() != Some(c) {
            collapsed.push(c);
        }
    }

    let substituted = collapsed
        .replace("PH", "F")
        .replace("GH", "")
        .replace("DG", "G")
        .replace("KN", "N")
        .replace("WR", "R");

    if substituted.is_empty() {
        return String::new();
    }
    let mut result = String::new();
    result.push(substituted.chars().next().expect("non-empty"));
    for c in substituted.chars().skip(1) {
        if !matches!(c, 'A' | 'E' | 'I' | 'O' | 'U') {
            result.push(c);
        }
    }

    result.truncate(4);
    while result.len() < 4 {
        result.push('0');
    }
    result
}

/// Fold common Latin diacritics to ASCII and lowercase.
pub fn fold_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            'ç' | 'Ç' => 'c',
            'ß' => 's',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Tokenize a personal or organization name: accent-fold, split on
/// whitespace and punctuation, drop empties.
pub fn tokenize_name(name: &str) -> Vec<String> {
    fold_accents(name)
        .split(|c: char| c.is_whitespace() || c == '-' || c == '.' || c == ',' || c == '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert!((levenshtein_ratio("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
        assert_eq!(levenshtein_ratio("", ""), 1.0);
    }

    #[test]
    fn test_jaro_winkler() {
        assert_eq!(jaro_winkler("martha", "martha"), 1.0);
        let score = jaro_winkler("martha", "marhta");
        assert!(score > 0.94 && score < 1.0);
        assert_eq!(jaro_winkler("abc", ""), 0.0);
        assert!(jaro_winkler("dwayne", "duane") > 0.8);
        // common prefix boosts
        assert!(jaro_winkler("alice", "alicia") > jaro_winkler("alice", "clicea"));
    }

    #[test]
    fn test_token_jaccard() {
        let a = vec!["alice".to_string(), "roe".to_string()];
        let b = vec!["roe".to_string(), "alice".to_string()];
        assert_eq!(token_jaccard(&a, &b), 1.0);
        let c = vec!["alice".to_string(), "smith".to_string()];
        assert!((token_jaccard(&a, &c) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_soundex() {
        assert_eq!(soundex("Robert"), "R163");
        assert_eq!(soundex("Rupert"), "R163");
        assert_eq!(soundex("Ashcraft"), "A261");
        assert_eq!(soundex(""), "0000");
        assert_eq!(soundex("Pfister"), soundex("Pfistre"));
    }

    #[test]
    fn test_metaphone_like() {
        assert_eq!(metaphone("Philip"), metaphone("Filip"));
        assert!(!metaphone("Wright").is_empty());
        assert_eq!(metaphone(""), "");
    }

    #[test]
    fn test_fold_and_tokenize() {
        assert_eq!(fold_accents("José Muñoz"), "jose munoz");
        assert_eq!(
            tokenize_name("Roe, Alice-Marie"),
            vec!["roe", "alice", "marie"]
        );
        assert_eq!(tokenize_name("  "), Vec::<String>::new());
    }
}
