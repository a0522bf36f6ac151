use url::Url;

/// Placeholder replaced by the identifier in job URL templates
pub const ID_PLACEHOLDER: &str = "{id}";

/// Builds the URL for one identifier
///
/// # Examples
///
/// ```
/// use paddock::url::expand_template;
///
/// let url = expand_template("https://db.example.com/horse/{id}/", "2019104975").unwrap();
/// assert_eq!(url.as_str(), "https://db.example.com/horse/2019104975/");
/// ```
pub fn expand_template(template: &str, id: &str) -> Result<Url, url::ParseError> {
    Url::parse(&template.replace(ID_PLACEHOLDER, id))
}

/// Resolves a (possibly relative) link against the page it was found on
///
/// Fragments are dropped since they never change the fetched document.
pub fn resolve_link(base: &Url, href: &str) -> Result<Url, url::ParseError> {
    let mut url = base.join(href.trim())?;
    url.set_fragment(None);
    Ok(url)
}
