//! Lightweight attack-signature scan.
//!
//! The pipeline runs this over the request path and body after responding;
//! a match raises an async security alert without blocking or changing the
//! response.

use regex::Regex;

/// A fixed list of signatures, each with a category label.
pub struct SecurityScanner {
    signatures: Vec<(&'static str, Regex)>,
}

impl SecurityScanner {
    pub fn new() -> Self {
        let patterns: [(&str, &str); 6] = [
            ("path_traversal", r"\.\./"),
            ("path_traversal", r"(?i)%2e%2e%2f"),
            ("script_injection", r"(?i)<\s*script"),
            ("script_injection", r"(?i)javascript:"),
            ("sql_injection", r"(?i)\b(union\s+select|drop\s+table|insert\s+into|delete\s+from)\b"),
            ("sql_injection", r"(?i)'\s*(or|and)\s+'?1'?\s*=\s*'?1"),
        ];
        let signatures = patterns
            .iter()
            .map(|(category, pattern)| {
                // The list is fixed and known-valid.
                (*category, Regex::new(pattern).expect("invalid signature"))
            })
            .collect();
        Self { signatures }
    }

    /// Scan path and body, returning the first matching (category, pattern).
    pub fn scan(&self, path: &str, body: Option<&str>) -> Option<(String, String)> {
        for (category, re) in &self.signatures {
            if re.is_match(path) {
                return Some((category.to_string(), re.as_str().to_string()));
            }
            if let Some(body) = body {
                if re.is_match(body) {
                    return Some((category.to_string(), re.as_str().to_string()));
                }
            }
        }
        None
    }
}

impl Default for SecurityScanner {
    fn default() -> Self {
        Self::new()
    }
}
