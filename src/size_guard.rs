use slog::{error, Logger};

use crate::document::{Fields, FIELD_KEY, FIELD_NAMESPACE};

/// Hard per-document limit of the remote store (1 MiB).
pub const STORE_DOCUMENT_LIMIT: usize = 1024 * 1024;

/// Largest estimated size we attempt to write. Kept well under
/// [`STORE_DOCUMENT_LIMIT`] to absorb field and index overhead.
pub const MAX_DOCUMENT_SIZE: usize = 900_000;

/// Assumed serialized size of a field that is not a string.
const NON_STRING_FIELD_ESTIMATE: usize = 8;

/// Rough serialized size: field names plus string bytes, with a fixed
/// estimate for every non-string value.
pub fn estimate_size(fields: &Fields) -> usize {
    fields
        .iter()
        .map(|(name, value)| {
            name.len()
                + match value.as_str() {
                    Some(s) => s.len(),
                    None => NON_STRING_FIELD_ESTIMATE,
                }
        })
        .sum()
}

pub fn fits(fields: &Fields) -> bool {
    estimate_size(fields) <= MAX_DOCUMENT_SIZE
}

/// Returns whether the document may be written, logging the dropped key and
/// namespace when it may not.
pub fn admit(fields: &Fields, logger: &Logger) -> bool {
    if fits(fields) {
        return true;
    }
    error!(
        logger,
        "The item {:?} in namespace {:?} was too large to store and was dropped",
        str_field(fields, FIELD_KEY),
        str_field(fields, FIELD_NAMESPACE);
        "size" => estimate_size(fields)
    );
    false
}

fn str_field<'a>(fields: &'a Fields, name: &str) -> &'a str {
    fields.get(name).and_then(|v| v.as_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(payload_len: usize) -> Fields {
        let mut f = Fields::new();
        f.insert("namespace".into(), json!("features"));
        f.insert("key".into(), json!("k"));
        f.insert("version".into(), json!(1));
        f.insert("payload".into(), json!("x".repeat(payload_len)));
        f
    }

    #[test]
    fn estimate_counts_names_strings_and_numbers() {
        // "namespace"(9)+8, "key"(3)+1, "version"(7)+8, "payload"(7)+10
        assert_eq!(estimate_size(&doc(10)), 9 + 8 + 3 + 1 + 7 + 8 + 7 + 10);
    }

    #[test]
    fn threshold_is_inclusive() {
        let overhead = estimate_size(&doc(0));
        assert!(fits(&doc(MAX_DOCUMENT_SIZE - overhead)));
        assert!(!fits(&doc(MAX_DOCUMENT_SIZE - overhead + 1)));
    }

    #[test]
    fn threshold_stays_below_store_limit() {
        assert!(MAX_DOCUMENT_SIZE * 10 <= STORE_DOCUMENT_LIMIT * 9);
    }
}
