use regex::Regex;

use super::StorageError;

/// Glob over object keys.  `*` matches any run of characters, `/` included,
/// so `sgx-data/*.csv` also matches `sgx-data/2025-03-14/ticks.csv`.  `?`
/// matches one character, everything else is literal.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    pattern: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<KeyPattern, StorageError> {
        let pattern = pattern.trim().trim_start_matches('/');
        let mut re = String::with_capacity(pattern.len() + 8);
        re.push('^');
        for c in pattern.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|_| StorageError::InvalidKey(pattern.to_string()))?;
        Ok(KeyPattern {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The part before the first wildcard, usable as a listing prefix.
    pub fn literal_prefix(&self) -> &str {
        let end = self.pattern.find(['*', '?']).unwrap_or(self.pattern.len());
        &self.pattern[..end]
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn star_crosses_partitions() -> Result<(), Box<dyn Error>> {
        let p = KeyPattern::new("sgx-data/*.csv")?;
        assert!(p.matches("sgx-data/2025-03-14/WEBPXTICK_DT-20250314.csv"));
        assert!(p.matches("sgx-data/a.csv"));
        assert!(!p.matches("sgx-data/2025-03-14/WEBPXTICK_DT.zip"));
        assert!(!p.matches("other/a.csv"));
        assert_eq!(p.literal_prefix(), "sgx-data/");
        Ok(())
    }

    #[test]
    fn literal_characters_are_escaped() -> Result<(), Box<dyn Error>> {
        let p = KeyPattern::new("sgx-data/2025-03-1?/a+b.csv")?;
        assert!(p.matches("sgx-data/2025-03-14/a+b.csv"));
        assert!(!p.matches("sgx-data/2025-03-14/aab.csv"));
        assert!(!p.matches("sgx-data/2025-03-140/a+b.csv"));
        assert_eq!(p.literal_prefix(), "sgx-data/2025-03-1");
        Ok(())
    }

    #[test]
    fn no_wildcard_is_exact() -> Result<(), Box<dyn Error>> {
        let p = KeyPattern::new("/sgx-data/x.csv")?;
        assert!(p.matches("sgx-data/x.csv"));
        assert!(!p.matches("sgx-data/x.csv.bak"));
        assert_eq!(p.literal_prefix(), "sgx-data/x.csv");
        Ok(())
    }
}
