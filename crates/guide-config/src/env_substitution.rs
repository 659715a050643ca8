use guide_core::{GuideError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;

// ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Substitute environment variable references in raw configuration text.
/// Every unresolved reference without a default is reported at once.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing_vars = Vec::new();

    let result = ENV_VAR_REGEX.replace_all(input, |cap: &regex::Captures| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing_vars.push(var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if !missing_vars.is_empty() {
        return Err(GuideError::ConfigError(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_env_vars() {
        env::set_var("GUIDE_TEST_HOST", "ollama.local");

        let text = "base_url: http://${GUIDE_TEST_HOST}:11434\nmodel: ${GUIDE_NOT_SET:-gemma3:4b}\n";
        let out = substitute_env_vars(text).unwrap();

        assert_eq!(out, "base_url: http://ollama.local:11434\nmodel: gemma3:4b\n");

        env::remove_var("GUIDE_TEST_HOST");
    }

    #[test]
    fn test_missing_vars_are_reported_together() {
        let err = substitute_env_vars("a: ${GUIDE_MISSING_A}\nb: ${GUIDE_MISSING_B}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GUIDE_MISSING_A"));
        assert!(msg.contains("GUIDE_MISSING_B"));
    }

    #[test]
    fn test_text_without_references_is_untouched() {
        let text = "service:\n  model: plain\n";
        assert_eq!(substitute_env_vars(text).unwrap(), text);
    }
}
