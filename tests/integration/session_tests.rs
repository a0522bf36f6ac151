//! Form login against a mock account page

use paddock::config::SessionConfig;
use paddock::fetch::build_http_client;
use paddock::session::{establish_best_effort, FormLogin, SessionEstablisher, SessionStatus};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE: &str = r#"<html><body>
  <form action="/account/" method="post">
    <input type="hidden" name="pid" value="login">
    <input type="text" name="login_id">
    <input type="password" name="pswd">
    <input type="submit" name="go" value="ログイン">
  </form>
</body></html>"#;

const MEMBER_PAGE: &str = r#"<html><body><a href="/account/?pid=logout">ログアウト</a></body></html>"#;

fn session_config(server: &MockServer) -> SessionConfig {
    SessionConfig {
        login_url: format!("{}/account/?pid=login", server.uri()),
        submit_url: None,
        username_field: "login_id".to_string(),
        password_field: "pswd".to_string(),
        username_env: "PADDOCK_IT_UNSET_USER".to_string(),
        password_env: "PADDOCK_IT_UNSET_PASS".to_string(),
        logged_in_marker: Some("ログアウト".to_string()),
    }
}

#[tokio::test]
async fn test_form_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/account/"))
        .and(body_string_contains("pid=login"))
        .and(body_string_contains("login_id=member%40example.com"))
        .and(body_string_contains("pswd=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MEMBER_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let login = FormLogin::new(build_http_client().unwrap(), session_config(&server))
        .with_credentials("member@example.com", "hunter2");

    assert_eq!(login.establish().await.unwrap(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_already_logged_in_skips_submit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MEMBER_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // No credentials are needed when nothing is submitted
    let login = FormLogin::new(build_http_client().unwrap(), session_config(&server));

    assert_eq!(
        login.establish().await.unwrap(),
        SessionStatus::AlreadyAuthenticated
    );
}

#[tokio::test]
async fn test_rejected_login_is_unconfirmed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/account/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;

    let login = FormLogin::new(build_http_client().unwrap(), session_config(&server))
        .with_credentials("member@example.com", "wrong");

    assert_eq!(login.establish().await.unwrap(), SessionStatus::Unconfirmed);
}

#[tokio::test]
async fn test_failures_are_best_effort() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;

    // Credentials come from unset environment variables
    let login = FormLogin::new(build_http_client().unwrap(), session_config(&server));

    assert!(login.establish().await.is_err());
    assert_eq!(establish_best_effort(&login).await, None);
}
