//! Escaping for values spliced into SOQL statements and SOAP envelopes.
//!
//! Every user-provided value that ends up inside a SOQL string literal or an
//! XML element goes through this module.
//!
//! ```rust
//! use busbar_sf_client::security::soql;
//!
//! let name = soql::escape_string("O'Brien");
//! let query = format!("SELECT Id FROM User WHERE LastName = '{}'", name);
//! assert_eq!(query, "SELECT Id FROM User WHERE LastName = 'O\\'Brien'");
//! ```

/// SOQL escaping.
pub mod soql {
    /// Escape a value for use inside a single-quoted SOQL literal.
    #[must_use]
    pub fn escape_string(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 8);
        for ch in value.chars() {
            match ch {
                '\'' => escaped.push_str("\\'"),
                '\\' => escaped.push_str("\\\\"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                _ => escaped.push(ch),
            }
        }
        escaped
    }

    /// Whether `name` can be used unquoted as an sobject or field name
    /// (letters, digits, single underscores, `__c`-style suffixes).
    #[must_use]
    pub fn is_safe_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {}
            _ => return false,
        }
        name.len() <= 255
            && !name.ends_with('_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// XML escaping for SOAP bodies.
pub mod xml {
    /// Escape the five predefined XML entities.
    #[must_use]
    pub fn escape(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 16);
        for ch in value.chars() {
            match ch {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                '\'' => escaped.push_str("&apos;"),
                _ => escaped.push(ch),
            }
        }
        escaped
    }

    /// Reverse [`escape`] for text read out of a SOAP response.
    #[must_use]
    pub fn unescape(value: &str) -> String {
        value
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    }
}
