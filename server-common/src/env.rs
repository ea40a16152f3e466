use std::{env::VarError, str::FromStr};

use anyhow::{anyhow, Context, Result};

/// Read a required environment variable and parse it.
pub fn from_env<T>(key: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    optional_env(key)?.ok_or(anyhow!("{key} is not set"))
}

/// Read an optional environment variable and parse it.
///
/// Unset and empty variables are both `None`. A variable that is set but
/// can not be parsed is an error, never silently ignored.
pub fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(
            value.parse().with_context(|| format!("{key} is not valid"))?,
        )),
        Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("{key} is not valid")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_optional_env_unset_and_empty() {
        std::env::remove_var("SERVER_COMMON_TEST_UNSET");
        std::env::set_var("SERVER_COMMON_TEST_EMPTY", "");

        assert!(optional_env::<u16>("SERVER_COMMON_TEST_UNSET")
            .unwrap()
            .is_none());
        assert!(optional_env::<u16>("SERVER_COMMON_TEST_EMPTY")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_optional_env_parse() {
        std::env::set_var("SERVER_COMMON_TEST_PORT", "8080");
        std::env::set_var("SERVER_COMMON_TEST_BAD_PORT", "eighty");

        assert_eq!(
            optional_env::<u16>("SERVER_COMMON_TEST_PORT").unwrap(),
            Some(8080)
        );
        let err = optional_env::<u16>("SERVER_COMMON_TEST_BAD_PORT").unwrap_err();
        assert!(err.to_string().contains("SERVER_COMMON_TEST_BAD_PORT"));
    }

    #[test]
    fn test_from_env_required() {
        std::env::remove_var("SERVER_COMMON_TEST_REQUIRED");

        let err = from_env::<String>("SERVER_COMMON_TEST_REQUIRED").unwrap_err();
        assert_eq!(err.to_string(), "SERVER_COMMON_TEST_REQUIRED is not set");
    }
}
