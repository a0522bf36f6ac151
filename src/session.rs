//! Session establishment
//!
//! Some sites serve complete pages only to a logged-in session. A
//! [`SessionEstablisher`] runs once before dispatch; the cookies it obtains
//! live in the HTTP client shared with the fetcher. Establishment is
//! best-effort: a failed login is logged and the crawl proceeds anonymously.

use crate::config::SessionConfig;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// What establishment achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session was already logged in; nothing was submitted
    AlreadyAuthenticated,

    /// Credentials were submitted and the logged-in marker was found
    Authenticated,

    /// Credentials were submitted but success could not be confirmed
    Unconfirmed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("invalid login URL '{url}': {source}")]
    InvalidUrl { url: String, source: url::ParseError },

    #[error("login page returned HTTP status {0}")]
    Status(u16),

    #[error("login request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Establishes an authenticated session before the crawl
#[async_trait]
pub trait SessionEstablisher: Send + Sync {
    async fn establish(&self) -> Result<SessionStatus, SessionError>;
}

/// Runs an establisher, logging instead of failing
///
/// # Returns
///
/// * `Some(status)` - Establishment finished
/// * `None` - It failed; the crawl continues without a session
pub async fn establish_best_effort(establisher: &dyn SessionEstablisher) -> Option<SessionStatus> {
    match establisher.establish().await {
        Ok(status) => {
            match status {
                SessionStatus::AlreadyAuthenticated => tracing::info!("Session already logged in"),
                SessionStatus::Authenticated => tracing::info!("Logged in"),
                SessionStatus::Unconfirmed => {
                    tracing::warn!("Login submitted but not confirmed, continuing anyway")
                }
            }
            Some(status)
        }
        Err(e) => {
            tracing::warn!("Login failed, continuing without a session: {}", e);
            None
        }
    }
}

/// Login form fields found on a page
#[derive(Debug, Default, PartialEq, Eq)]
struct LoginForm {
    /// Whether the username input is present at all
    present: bool,

    /// The form's `action`, if any
    action: Option<String>,

    /// Other named inputs of the form (hidden tokens and the like)
    extra: Vec<(String, String)>,
}

/// Finds the form containing the username input
fn parse_login_form(body: &str, username_field: &str, password_field: &str) -> LoginForm {
    let document = Html::parse_document(body);
    let (Ok(forms), Ok(inputs)) = (Selector::parse("form"), Selector::parse("input[name]")) else {
        return LoginForm::default();
    };

    for form in document.select(&forms) {
        let names: Vec<_> = form
            .select(&inputs)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                Some((name, input.value().attr("value").unwrap_or(""), input.value().attr("type")))
            })
            .collect();

        if !names.iter().any(|(name, _, _)| *name == username_field) {
            continue;
        }

        let extra = names
            .into_iter()
            .filter(|(name, _, kind)| {
                *name != username_field
                    && *name != password_field
                    && !matches!(*kind, Some("submit") | Some("image") | Some("button"))
            })
            .map(|(name, value, _)| (name.to_string(), value.to_string()))
            .collect();

        return LoginForm {
            present: true,
            action: form.value().attr("action").map(str::to_string),
            extra,
        };
    }

    LoginForm::default()
}

/// Form-based login with credentials taken from the environment
pub struct FormLogin {
    client: Client,
    config: SessionConfig,
    credentials: Option<(String, String)>,
}

impl FormLogin {
    /// Creates a login over the client the fetcher will use
    pub fn new(client: Client, config: SessionConfig) -> Self {
        Self {
            client,
            config,
            credentials: None,
        }
    }

    /// Uses explicit credentials instead of the environment
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn credentials(&self) -> Result<(String, String), SessionError> {
        if let Some(credentials) = &self.credentials {
            return Ok(credentials.clone());
        }
        let read = |name: &str| {
            std::env::var(name).map_err(|_| SessionError::MissingCredentials(name.to_string()))
        };
        Ok((read(&self.config.username_env)?, read(&self.config.password_env)?))
    }

    fn marker_present(&self, body: &str) -> bool {
        self.config
            .logged_in_marker
            .as_deref()
            .is_some_and(|marker| body.contains(marker))
    }

    async fn get(&self, url: &Url) -> Result<String, SessionError> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}

fn parse_url(raw: &str) -> Result<Url, SessionError> {
    Url::parse(raw).map_err(|source| SessionError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

#[async_trait]
impl SessionEstablisher for FormLogin {
    async fn establish(&self) -> Result<SessionStatus, SessionError> {
        let login_url = parse_url(&self.config.login_url)?;
        let page = self.get(&login_url).await?;

        let form = parse_login_form(&page, &self.config.username_field, &self.config.password_field);
        if self.marker_present(&page) || !form.present {
            return Ok(SessionStatus::AlreadyAuthenticated);
        }

        let (username, password) = self.credentials()?;

        let submit_url = match (&self.config.submit_url, &form.action) {
            (Some(url), _) => parse_url(url)?,
            (None, Some(action)) if !action.trim().is_empty() => {
                login_url
                    .join(action.trim())
                    .map_err(|source| SessionError::InvalidUrl {
                        url: action.clone(),
                        source,
                    })?
            }
            (None, _) => login_url.clone(),
        };

        let mut fields = form.extra;
        fields.push((self.config.username_field.clone(), username));
        fields.push((self.config.password_field.clone(), password));

        tracing::debug!("Submitting login form to {}", submit_url);
        let response = self.client.post(submit_url).form(&fields).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Ok(SessionStatus::Unconfirmed);
        }

        let confirmed = match &self.config.logged_in_marker {
            Some(_) => self.marker_present(&body),
            None => {
                !parse_login_form(&body, &self.config.username_field, &self.config.password_field)
                    .present
            }
        };

        Ok(if confirmed {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Unconfirmed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
        <html><body>
          <form action="/account/" method="post">
            <input type="hidden" name="pid" value="login">
            <input type="hidden" name="action" value="auth">
            <input type="text" name="login_id">
            <input type="password" name="pswd">
            <input type="image" name="go" alt="login">
          </form>
        </body></html>
    "#;

    #[test]
    fn test_parse_login_form() {
        let form = parse_login_form(LOGIN_PAGE, "login_id", "pswd");
        assert!(form.present);
        assert_eq!(form.action.as_deref(), Some("/account/"));
        assert_eq!(
            form.extra,
            vec![
                ("pid".to_string(), "login".to_string()),
                ("action".to_string(), "auth".to_string())
            ]
        );
    }

    #[test]
    fn test_no_form_means_logged_in() {
        let page = "<html><body><a href=\"/logout\">ログアウト</a></body></html>";
        assert!(!parse_login_form(page, "login_id", "pswd").present);
    }

    #[test]
    fn test_missing_credentials() {
        let config = SessionConfig {
            login_url: "https://regist.example.com/account/?pid=login".to_string(),
            submit_url: None,
            username_field: "login_id".to_string(),
            password_field: "pswd".to_string(),
            username_env: "PADDOCK_TEST_UNSET_USER_7f3a".to_string(),
            password_env: "PADDOCK_TEST_UNSET_PASS_7f3a".to_string(),
            logged_in_marker: None,
        };
        let login = FormLogin::new(Client::new(), config);
        assert!(matches!(
            login.credentials(),
            Err(SessionError::MissingCredentials(name)) if name == "PADDOCK_TEST_UNSET_USER_7f3a"
        ));

        let login = login.with_credentials("user", "secret");
        assert_eq!(
            login.credentials().unwrap(),
            ("user".to_string(), "secret".to_string())
        );
    }
}
