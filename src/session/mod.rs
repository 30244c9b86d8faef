//! Authenticated HTTP session against one course site.
//!
//! A [`SiteSession`] owns two clients sharing one cookie jar: a regular client
//! for pages and media, and a login client that does not follow redirects so
//! the login response's headers stay visible.

mod error;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::{Client, redirect};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use error::{DownloadError, SessionError};

use crate::auth::{CookieLine, SessionVault, restore_cookies_into};
use crate::stack::PageFetcher;
use crate::user_agent;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (video files are large).
pub const READ_TIMEOUT_SECS: u64 = 600;

/// Header whose presence marks a successful login.
pub const DEFAULT_AUTH_MARKER_HEADER: &str = "set-cookie";

const LOGIN_PATH: &str = "/member/login_new.php";
const LOGIN_FORM_PREFIX: &str = "/member/login";

/// Site account credentials. The password never appears in Debug output.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The account user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Supplies credentials the first time a login is needed and none were
/// configured, typically by asking on the terminal.
pub trait CredentialPrompt: Send + Sync {
    /// Returns credentials, or `None` when there is nobody to ask.
    fn ask(&self) -> Option<Credentials>;
}

impl<F> CredentialPrompt for F
where
    F: Fn() -> Option<Credentials> + Send + Sync,
{
    fn ask(&self) -> Option<Credentials> {
        self()
    }
}

/// Connection settings for a [`SiteSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Scheme and host of the course site, e.g. `https://www.japanesepod101.com/`.
    pub site_root: Url,
    /// Response header required on the login response.
    pub auth_marker_header: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl SessionConfig {
    /// Settings for `site_root` with default timeouts and marker header.
    #[must_use]
    pub fn new(site_root: Url) -> Self {
        Self {
            site_root,
            auth_marker_header: DEFAULT_AUTH_MARKER_HEADER.to_string(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// Derives the site root (scheme, host, port) of any URL on the site.
///
/// # Errors
///
/// Returns [`SessionError::InvalidUrl`] for unparseable or host-less URLs.
pub fn site_root_of(url: &str) -> Result<Url, SessionError> {
    let invalid = || SessionError::InvalidUrl {
        url: url.to_string(),
    };
    let parsed = Url::parse(url).map_err(|_| invalid())?;
    if parsed.host_str().is_none() {
        return Err(invalid());
    }
    parsed.join("/").map_err(|_| invalid())
}

/// An authenticated session with the course site.
pub struct SiteSession {
    client: Client,
    login_client: Client,
    jar: Arc<Jar>,
    config: SessionConfig,
    credentials: OnceLock<Credentials>,
    prompt: Option<Box<dyn CredentialPrompt>>,
    vault: Option<SessionVault>,
}

impl fmt::Debug for SiteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteSession")
            .field("site_root", &self.config.site_root.as_str())
            .field("credentials", &self.credentials.get())
            .field("prompt", &self.prompt.is_some())
            .field("vault", &self.vault)
            .finish_non_exhaustive()
    }
}

impl SiteSession {
    /// Creates a session with an empty cookie jar.
    ///
    /// `vault`, when given, is where login cookies are persisted and restored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Client`] if an HTTP client cannot be built.
    pub fn new(
        config: SessionConfig,
        credentials: Option<Credentials>,
        vault: Option<SessionVault>,
    ) -> Result<Self, SessionError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&jar, &config, redirect::Policy::default())?;
        let login_client = build_client(&jar, &config, redirect::Policy::none())?;

        Ok(Self {
            client,
            login_client,
            jar,
            config,
            credentials: credentials.map_or_else(OnceLock::new, OnceLock::from),
            prompt: None,
            vault,
        })
    }

    /// Asks `prompt` for credentials when a login is needed and none were
    /// given to [`SiteSession::new`]. Its first answer is kept for the session.
    #[must_use]
    pub fn with_credential_prompt(mut self, prompt: impl CredentialPrompt + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    /// Whether a login can be attempted at all.
    fn can_login(&self) -> bool {
        self.credentials.get().is_some() || self.prompt.is_some()
    }

    fn resolve_credentials(&self) -> Option<&Credentials> {
        if let Some(credentials) = self.credentials.get() {
            return Some(credentials);
        }
        let asked = self.prompt.as_ref()?.ask()?;
        Some(self.credentials.get_or_init(|| asked))
    }

    /// The site root every relative link is resolved against.
    #[must_use]
    pub fn site_root(&self) -> &Url {
        &self.config.site_root
    }

    /// Restores the persisted session into the jar.
    ///
    /// Returns `true` when at least one live cookie was restored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the session file cannot be read.
    #[instrument(level = "debug", skip(self))]
    pub fn restore(&self) -> Result<bool, SessionError> {
        let Some(vault) = &self.vault else {
            return Ok(false);
        };
        let Some(cookies) = vault.load()? else {
            return Ok(false);
        };

        let restored = restore_cookies_into(&self.jar, &cookies);
        info!(restored, "restored persisted session");
        Ok(restored > 0)
    }

    /// Restores the persisted session, logging in when there is none.
    ///
    /// An unreadable session file is discarded with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Authentication`] when login is needed and fails.
    pub async fn restore_or_login(&self) -> Result<(), SessionError> {
        match self.restore() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(error) => {
                warn!(error = %error, "discarding unreadable persisted session");
                if let Some(vault) = &self.vault {
                    vault.clear()?;
                }
            }
        }
        self.login().await
    }

    /// Logs in with the configured credentials and persists the new session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Authentication`] when no credentials are
    /// configured or obtainable from the prompt, the site rejects them, or
    /// the marker header is absent.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<(), SessionError> {
        let Some(credentials) = self.resolve_credentials() else {
            return Err(SessionError::authentication(
                "no credentials available for login",
            ));
        };

        let login_url = self
            .config
            .site_root
            .join(LOGIN_PATH)
            .map_err(|_| SessionError::InvalidUrl {
                url: LOGIN_PATH.to_string(),
            })?;

        let form = [
            ("amember_login", credentials.username.as_str()),
            ("amember_pass", credentials.password.as_str()),
        ];
        let response = self
            .login_client
            .post(login_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| SessionError::network(login_url.as_str(), e))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(SessionError::authentication(format!(
                "login returned HTTP {}",
                status.as_u16()
            )));
        }
        if !response
            .headers()
            .contains_key(self.config.auth_marker_header.as_str())
        {
            return Err(SessionError::authentication(format!(
                "login response lacks the {} header; check username and password",
                self.config.auth_marker_header
            )));
        }

        let captured: Vec<CookieLine> = response
            .cookies()
            .map(|cookie| CookieLine::from_response_cookie(&cookie, response.url()))
            .collect();
        info!(
            username = %credentials.username,
            cookies = captured.len(),
            "logged in"
        );

        if let Some(vault) = &self.vault {
            vault.store(&captured)?;
            debug!(path = %vault.path().display(), "persisted session");
        }
        Ok(())
    }

    /// Fetches a page body, re-logging in once if the session has expired.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Authentication`] when the session cannot be
    /// re-established, or the fetch error otherwise.
    #[instrument(skip(self))]
    pub async fn get_page(&self, url: &str) -> Result<String, SessionError> {
        match self.fetch_page_once(url).await {
            Err(SessionError::SessionExpired { status, .. }) if self.can_login() => {
                warn!(status, "session expired; logging in again");
                self.login().await?;
                match self.fetch_page_once(url).await {
                    Err(SessionError::SessionExpired { status, .. }) => {
                        Err(SessionError::authentication(format!(
                            "still refused after re-login (HTTP {status}) fetching {url}"
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn fetch_page_once(&self, url: &str) -> Result<String, SessionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::network(url, e))?;

        let status = response.status().as_u16();
        if matches!(status, 401 | 403) || is_login_redirect(response.url()) {
            let status = if matches!(status, 401 | 403) { status } else { 0 };
            return Err(SessionError::SessionExpired {
                url: url.to_string(),
                status,
            });
        }
        if !response.status().is_success() {
            return Err(SessionError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        response
            .text()
            .await
            .map_err(|e| SessionError::network(url, e))
    }

    /// Streams `url` into `path`, writing to `<path>.part` first.
    ///
    /// Returns the number of bytes written. An existing file at `path` is
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on network, status, or filesystem failures.
    #[instrument(skip(self, path), fields(url = %url, path = %path.display()))]
    pub async fn download_to_file(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::InvalidUrl {
            url: url.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let part_path = partial_path(path);
        let mut file = File::create(&part_path)
            .await
            .map_err(|e| DownloadError::io(part_path.clone(), e))?;

        let streamed = stream_to_file(&mut file, response, url, &part_path).await;
        let bytes_written = match streamed {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %part_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(error);
            }
        };

        tokio::fs::rename(&part_path, path)
            .await
            .map_err(|e| DownloadError::io(path.to_path_buf(), e))?;

        info!(bytes = bytes_written, "download complete");
        Ok(bytes_written)
    }
}

#[async_trait]
impl PageFetcher for SiteSession {
    async fn fetch_page(&self, url: &str) -> Result<String, SessionError> {
        self.get_page(url).await
    }
}

fn build_client(
    jar: &Arc<Jar>,
    config: &SessionConfig,
    redirect_policy: redirect::Policy,
) -> Result<Client, SessionError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.read_timeout_secs))
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
        .cookie_provider(Arc::clone(jar))
        .redirect(redirect_policy)
        .build()
        .map_err(SessionError::Client)
}

fn is_login_redirect(final_url: &Url) -> bool {
    final_url.path().starts_with(LOGIN_FORM_PREFIX)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_site_root_of_strips_path_and_query() {
        let root = site_root_of("https://www.japanesepod101.com/lesson-library/beginner?x=1").unwrap();
        assert_eq!(root.as_str(), "https://www.japanesepod101.com/");
    }

    #[test]
    fn test_site_root_of_rejects_garbage() {
        assert!(site_root_of("not a url").is_err());
        assert!(site_root_of("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_is_login_redirect() {
        let login: Url = "https://x.com/member/login_new.php".parse().unwrap();
        let lesson: Url = "https://x.com/lesson/a".parse().unwrap();
        assert!(is_login_redirect(&login));
        assert!(!is_login_redirect(&lesson));
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/01 - A - Review.mp3")),
            PathBuf::from("/tmp/01 - A - Review.mp3.part")
        );
    }

    #[test]
    fn test_prompt_is_asked_once_and_only_when_needed() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let config = SessionConfig::new("http://127.0.0.1:9/".parse().unwrap());
        let session = SiteSession::new(config, None, None)
            .unwrap()
            .with_credential_prompt(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(Credentials::new("asked", "pw"))
            });

        assert!(session.can_login());
        assert_eq!(asked.load(Ordering::SeqCst), 0);
        assert_eq!(session.resolve_credentials().unwrap().username(), "asked");
        assert_eq!(session.resolve_credentials().unwrap().username(), "asked");
        assert_eq!(asked.load(Ordering::SeqCst), 1);

        let config = SessionConfig::new("http://127.0.0.1:9/".parse().unwrap());
        let configured = SiteSession::new(config, Some(Credentials::new("cli", "pw")), None)
            .unwrap()
            .with_credential_prompt(|| -> Option<Credentials> { panic!("must not ask") });
        assert_eq!(configured.resolve_credentials().unwrap().username(), "cli");
    }

    #[tokio::test]
    async fn test_login_without_credentials_is_authentication_error() {
        let config = SessionConfig::new("http://127.0.0.1:9/".parse().unwrap());
        let session = SiteSession::new(config, None, None).unwrap();
        let error = session.login().await.unwrap_err();
        assert!(matches!(error, SessionError::Authentication { .. }));
    }
}
