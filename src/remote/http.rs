use std::time::Duration;

/// Timeout for calls made on the way to an interactive answer (pre-query pull).
pub const LIGHT_TIMEOUT_SECS: u64 = 10;
/// Timeout for everything else. A hung sync call would otherwise hang the
/// shell prompt.
pub const HEAVY_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_SERVER_URL: &str = "https://api.hishtory.dev";

/// Returns the sync server base URL from `HISHTORY_SERVER` or the default.
pub fn server_url() -> String {
    match std::env::var("HISHTORY_SERVER") {
        Ok(url) if !url.is_empty() => url.trim_end_matches('/').to_owned(),
        _ => DEFAULT_SERVER_URL.to_owned(),
    }
}

/// Build a blocking HTTP client with the given request timeout.
///
/// # Errors
///
/// Returns an error if the client cannot be constructed (e.g., invalid TLS config).
pub fn build_client(timeout_secs: u64) -> reqwest::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(concat!("hishtory/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn server_url_defaults_when_unset_or_empty() {
        unsafe { std::env::remove_var("HISHTORY_SERVER") };
        assert_eq!(server_url(), DEFAULT_SERVER_URL);
        unsafe { std::env::set_var("HISHTORY_SERVER", "") };
        assert_eq!(server_url(), DEFAULT_SERVER_URL);
        unsafe { std::env::remove_var("HISHTORY_SERVER") };
    }

    #[test]
    #[serial]
    fn server_url_honours_override() {
        unsafe { std::env::set_var("HISHTORY_SERVER", "http://localhost:8080/") };
        let url = server_url();
        unsafe { std::env::remove_var("HISHTORY_SERVER") };
        assert_eq!(url, "http://localhost:8080");
    }
}
