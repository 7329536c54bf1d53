use bigdecimal::BigDecimal;
use std::fmt;

pub const CUSTOMER_REF_MAX_LEN: usize = 128;
pub const ACCOUNT_ID_MAX_LEN: usize = 64;
pub const EXTERNAL_ID_MAX_LEN: usize = 255;
pub const DISTRIBUTION_STATUSES: &[&str] = &["pending", "partial", "settled", "failed"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::error::AppError {
    fn from(err: ValidationError) -> Self {
        crate::error::AppError::Validation(err.to_string())
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

/// Customer references are opaque ids from the platform: letters, digits and `-_.:@`.
pub fn validate_customer_ref(customer_ref: &str) -> ValidationResult {
    let customer_ref = sanitize_string(customer_ref);
    validate_required("customer_ref", &customer_ref)?;
    validate_max_len("customer_ref", &customer_ref, CUSTOMER_REF_MAX_LEN)?;

    if !customer_ref
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "-_.:@".contains(ch))
    {
        return Err(ValidationError::new(
            "customer_ref",
            "must contain only letters, digits and -_.:@",
        ));
    }

    Ok(())
}

pub fn validate_account_id(account_id: &str) -> ValidationResult {
    validate_required("account_id", account_id)?;
    validate_max_len("account_id", account_id, ACCOUNT_ID_MAX_LEN)?;

    if !account_id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-') {
        return Err(ValidationError::new(
            "account_id",
            "must contain only letters, digits and '-'",
        ));
    }

    Ok(())
}

pub fn validate_external_id(external_id: &str) -> ValidationResult {
    validate_required("external_id", external_id)?;
    validate_max_len("external_id", external_id, EXTERNAL_ID_MAX_LEN)
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn validates_enum_values() {
        assert!(validate_enum("status", "partial", DISTRIBUTION_STATUSES).is_ok());
        assert!(validate_enum("status", "unknown", DISTRIBUTION_STATUSES).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_customer_ref() {
        assert!(validate_customer_ref("cust-42").is_ok());
        assert!(validate_customer_ref("learner@costbyte.co.za").is_ok());
        assert!(validate_customer_ref("  cust-42  ").is_ok());
        assert!(validate_customer_ref("").is_err());
        assert!(validate_customer_ref("two words").is_err());
        assert!(validate_customer_ref("<script>").is_err());
        assert!(validate_customer_ref(&"a".repeat(129)).is_err());
    }

    #[test]
    fn validates_account_id() {
        assert!(validate_account_id("6212345678901").is_ok());
        assert!(validate_account_id("ACC-9").is_ok());
        assert!(validate_account_id("").is_err());
        assert!(validate_account_id("62 12").is_err());
    }

    #[test]
    fn validates_positive_amount() {
        let positive = BigDecimal::from_str("1.23").expect("valid decimal");
        let zero = BigDecimal::from(0);
        let negative = BigDecimal::from(-1);

        assert!(validate_positive_amount(&positive).is_ok());
        assert!(validate_positive_amount(&zero).is_err());
        assert!(validate_positive_amount(&negative).is_err());
    }
}
