use url::Url;

/// Returns the key used to group requests by target domain
///
/// The key is the lowercase host plus an explicit port when the URL carries
/// one, so two local test servers on different ports are paced independently.
/// URLs without a host (which the frontier never produces) share the empty key.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use paddock::url::domain_key;
///
/// let url = Url::parse("https://DB.Example.com/horse/1/").unwrap();
/// assert_eq!(domain_key(&url), "db.example.com");
///
/// let url = Url::parse("http://127.0.0.1:8080/race/1/").unwrap();
/// assert_eq!(domain_key(&url), "127.0.0.1:8080");
/// ```
pub fn domain_key(url: &Url) -> String {
    let host = url.host_str().map(|h| h.to_lowercase()).unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}
