use mongodb::bson::oid::ObjectId;
use regex::Regex;
use validator::ValidationError;

use super::ApiError;

/// Requires a dotted domain, so `dev@localhost` is rejected.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let re = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    if re.is_match(email.trim()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("email");
        err.message = Some("must be a valid email address".into());
        Err(err)
    }
}

/// At least 8 characters with one letter and one digit.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let long_enough = password.chars().count() >= 8;
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if long_enough && has_letter && has_digit {
        Ok(())
    } else {
        let mut err = ValidationError::new("weak_password");
        err.message = Some("must be at least 8 characters with a letter and a digit".into());
        Err(err)
    }
}

pub fn validate_positive_amount(amount: f64) -> Result<(), ValidationError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("not_positive");
        err.message = Some("must be greater than zero".into());
        Err(err)
    }
}

pub fn validate_object_id_str(value: &str) -> Result<(), ValidationError> {
    ObjectId::parse_str(value)
        .map(|_| ())
        .map_err(|_| {
            let mut err = ValidationError::new("object_id");
            err.message = Some("must be a valid ObjectId".into());
            err
        })
}

/// Skills are lowercased, trimmed, de-duplicated and emptied entries dropped.
pub fn normalize_skills(skills: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(skills.len());
    for skill in skills {
        let s = skill.trim().to_lowercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

pub fn parse_object_id(value: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value).map_err(|_| ApiError::bad_request(format!("Invalid {} ID", what)))
}

/// Escapes user input before it is embedded in a `$regex` filter.
pub fn escape_regex(input: &str) -> String {
    regex::escape(input.trim())
}

pub fn generate_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let code: u32 = rng.gen_range(100000..=999999);
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(validate_email("dev@example.co.id").is_ok());
        assert!(validate_email(" Dev@Example.com ").is_ok());
        assert!(validate_email("dev@localhost").is_err());
        assert!(validate_email("no-at-sign.com").is_err());
    }

    #[test]
    fn password_needs_letters_and_digits() {
        assert!(validate_password("hunter22a").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("allletters").is_err());
        assert!(validate_password("1234567890").is_err());
    }

    #[test]
    fn amounts_must_be_positive_and_finite() {
        assert!(validate_positive_amount(150000.0).is_ok());
        assert!(validate_positive_amount(0.0).is_err());
        assert!(validate_positive_amount(-5.0).is_err());
        assert!(validate_positive_amount(f64::NAN).is_err());
    }

    #[test]
    fn skills_are_normalized() {
        let skills = vec![" Rust ".to_string(), "rust".into(), "".into(), "UI Design".into()];
        assert_eq!(normalize_skills(&skills), vec!["rust", "ui design"]);
    }

    #[test]
    fn object_ids_are_checked() {
        assert!(validate_object_id_str("65a1b2c3d4e5f60718293a4b").is_ok());
        assert!(validate_object_id_str("not-an-id").is_err());
        assert_eq!(parse_object_id("x", "project").unwrap_err().message, "Invalid project ID");
    }

    #[test]
    fn regex_input_is_escaped() {
        assert_eq!(escape_regex(" a.b* "), r"a\.b\*");
    }

    #[test]
    fn codes_have_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
