use url::Url;

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    /// Turn into a `Result`, prefixing the message with `context`
    pub fn into_result(self, context: &str) -> Result<(), String> {
        match self.error {
            Some(error) if !self.is_valid => Err(format!("{context}: {error}")),
            _ => Ok(()),
        }
    }
}

/// Validate a storefront URL (http or https with a host)
pub fn validate_store_url(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate a store identifier
pub fn validate_store_id(id: &str) -> ValidationResult {
    if id.trim().is_empty() {
        return ValidationResult::err("Store id cannot be empty");
    }

    if id.len() > 100 {
        return ValidationResult::err("Store id too long (max 100 characters)");
    }

    if !id.chars().all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return ValidationResult::err(
            "Store id may only contain letters, digits, '-', '_' and '.'",
        );
    }

    ValidationResult::ok()
}

/// Validate the per-probe timeout against the cycle budget
pub fn validate_probe_timeout(timeout: u64, cycle_timeout: u64) -> ValidationResult {
    if timeout == 0 {
        return ValidationResult::err("Probe timeout must be at least 1 second");
    }

    if timeout >= cycle_timeout {
        return ValidationResult::err("Probe timeout must be less than the cycle timeout");
    }

    ValidationResult::ok()
}

/// Validate the probe worker pool size
pub fn validate_concurrency(workers: usize) -> ValidationResult {
    if workers == 0 {
        return ValidationResult::err("Concurrency must be at least 1");
    }

    if workers > 64 {
        return ValidationResult::err("Concurrency too high (max 64)");
    }

    ValidationResult::ok()
}
