//! Strict SQL identifier validation.
//!
//! Table and column names come from a data-driven registry, so every name
//! is validated before it is quoted into a statement.

/// Longest identifier accepted (the `PostgreSQL` limit).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column name.
///
/// Accepts ASCII letters, digits and underscores, starting with a letter or
/// underscore, at most [`MAX_IDENTIFIER_LEN`] bytes.
///
/// # Errors
///
/// Returns a human-readable reason when the name is rejected.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let Some(first) = name.chars().next() else {
        return Err("identifier must not be empty".to_string());
    };

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "identifier '{name}' exceeds maximum length of {MAX_IDENTIFIER_LEN} bytes (got {})",
            name.len()
        ));
    }

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(format!(
            "identifier '{name}' must start with a letter or underscore, got '{first}'"
        ));
    }

    if let Some(ch) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(format!("identifier '{name}' contains invalid character '{ch}'"));
    }

    Ok(())
}

/// Validate and double-quote an identifier.
///
/// # Errors
///
/// Returns [`DatabaseError::InvalidIdentifier`](crate::DatabaseError::InvalidIdentifier)
/// when validation fails.
pub fn quoted(name: &str) -> Result<String, crate::DatabaseError> {
    validate_identifier(name).map_err(crate::DatabaseError::InvalidIdentifier)?;
    Ok(format!("\"{name}\""))
}
