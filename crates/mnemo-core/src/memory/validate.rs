//! Input validation helpers shared by every record input.

use crate::error::ValidationError;

/// Trimmed, non-empty text no longer than `max` characters
pub(crate) fn required_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let actual = trimmed.chars().count();
    if actual > max {
        return Err(ValidationError::TooLong { field, max, actual });
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`] but blank input becomes `None`
pub(crate) fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => required_text(field, text, max).map(Some),
    }
}

/// A finite value inside `[0, 1]`
pub(crate) fn unit_interval(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

/// Trimmed list with blank entries removed, bounded in size and entry length
pub(crate) fn bounded_list(
    field: &'static str,
    items: &[String],
    max_items: usize,
    max_len: usize,
) -> Result<Vec<String>, ValidationError> {
    if items.len() > max_items {
        return Err(ValidationError::TooManyItems {
            field,
            max: max_items,
            actual: items.len(),
        });
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if item.chars().count() > max_len {
            return Err(ValidationError::ItemTooLong { field, max: max_len });
        }
        if !out.iter().any(|existing: &String| existing == item) {
            out.push(item.to_string());
        }
    }
    Ok(out)
}

/// Lowercase identifier made of `[a-z0-9_]`
pub(crate) fn identifier(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<String, ValidationError> {
    let value = required_text(field, value, max)?.to_lowercase();
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(value)
    } else {
        Err(ValidationError::Malformed {
            field,
            reason: format!("'{}' may only contain a-z, 0-9 and '_'", value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_text_trims_and_counts_chars() {
        assert_eq!(required_text("content", "  hi  ", 10).unwrap(), "hi");
        assert!(matches!(
            required_text("content", "   ", 10),
            Err(ValidationError::Empty { field: "content" })
        ));
        // multi-byte characters count once
        assert!(required_text("content", "ééééé", 5).is_ok());
        assert!(required_text("content", "éééééé", 5).is_err());
    }

    #[test]
    fn test_bounded_list() {
        let items = vec![" a ".to_string(), "".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(bounded_list("tags", &items, 10, 5).unwrap(), vec!["a", "b"]);

        let many: Vec<String> = (0..51).map(|i| i.to_string()).collect();
        assert!(matches!(
            bounded_list("keywords", &many, 50, 100),
            Err(ValidationError::TooManyItems { actual: 51, .. })
        ));

        let long = vec!["x".repeat(101)];
        assert!(bounded_list("keywords", &long, 50, 100).is_err());
    }

    #[test]
    fn test_unit_interval_and_identifier() {
        assert!(unit_interval("confidence", 1.0).is_ok());
        assert!(unit_interval("confidence", 1.01).is_err());
        assert!(unit_interval("confidence", f64::NAN).is_err());

        assert_eq!(identifier("relation_type", "Works_On", 100).unwrap(), "works_on");
        assert!(identifier("relation_type", "drop table", 100).is_err());
    }
}
