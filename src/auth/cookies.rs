//! Session cookies: capture from login responses and restore into a `reqwest` jar.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::cookie::Jar;
use tracing::{debug, instrument, warn};
use url::Url;

/// A single cookie belonging to the authenticated site session.
///
/// The value field is intentionally redacted in Debug output to prevent
/// accidental logging of session tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieLine {
    /// The domain the cookie belongs to (e.g., `.japanesepod101.com`).
    pub domain: String,
    /// Whether subdomains should match.
    pub tailmatch: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Unix timestamp for expiry (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    /// Cookie value. Sensitive; never log it.
    value: String,
}

impl CookieLine {
    /// Creates a new cookie entry.
    #[must_use]
    pub fn new(
        domain: String,
        tailmatch: bool,
        path: String,
        secure: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            tailmatch,
            path,
            secure,
            expires,
            name,
            value,
        }
    }

    /// Captures a cookie set by a site response.
    ///
    /// Cookies without a `Domain` attribute are host-only and scoped to the
    /// host of `response_url`.
    #[must_use]
    pub fn from_response_cookie(cookie: &reqwest::cookie::Cookie<'_>, response_url: &Url) -> Self {
        let (domain, tailmatch) = match cookie.domain() {
            Some(domain) => {
                let domain = domain.trim_start_matches('.');
                (format!(".{domain}"), true)
            }
            None => (response_url.host_str().unwrap_or_default().to_string(), false),
        };
        let expires = cookie
            .expires()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |since| since.as_secs());

        Self::new(
            domain,
            tailmatch,
            cookie.path().unwrap_or("/").to_string(),
            cookie.secure(),
            expires,
            cookie.name().to_string(),
            cookie.value().to_string(),
        )
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive; do not log the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true when the cookie carries an expiry that has already passed.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        if self.expires == 0 {
            return false;
        }
        now.duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs() >= self.expires)
            .unwrap_or(false)
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Restores session cookies into an existing jar.
///
/// Expired cookies are dropped. Each remaining cookie is converted to a
/// `Set-Cookie` header string and added with an origin URL matching its domain.
/// Returns the number of cookies restored.
#[instrument(level = "debug", skip(jar, cookies), fields(count = cookies.len()))]
pub fn restore_cookies_into(jar: &Jar, cookies: &[CookieLine]) -> usize {
    let now = SystemTime::now();
    let mut restored = 0;

    for cookie in cookies {
        if cookie.is_expired_at(now) {
            debug!(domain = %cookie.domain, name = %cookie.name, "dropping expired cookie");
            continue;
        }

        let set_cookie = build_set_cookie_string(cookie);
        let origin_url = build_origin_url(cookie);

        if let Ok(url) = origin_url.parse::<Url>() {
            jar.add_cookie_str(&set_cookie, &url);
            restored += 1;
            debug!(domain = %cookie.domain, name = %cookie.name, "restored cookie into jar");
        } else {
            warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                "skipping cookie with unparseable domain"
            );
        }
    }

    restored
}

fn build_set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![format!("{}={}", cookie.name, cookie.value())];

    // Host-only cookies must not carry a Domain attribute.
    if cookie.tailmatch {
        parts.push(format!("Domain={}", cookie.domain));
    }
    parts.push(format!("Path={}", cookie.path));

    if cookie.secure {
        parts.push("Secure".to_string());
    }

    if cookie.expires > 0 {
        if let Some(expires_str) = unix_to_http_date(cookie.expires) {
            parts.push(format!("Expires={expires_str}"));
        } else {
            warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                expires = cookie.expires,
                "cookie expiry timestamp overflows SystemTime; treating as session cookie"
            );
        }
    }

    parts.join("; ")
}

fn build_origin_url(cookie: &CookieLine) -> String {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.strip_prefix('.').unwrap_or(&cookie.domain);
    format!("{scheme}://{domain}{}", cookie.path)
}

fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::Duration;

    let time = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}
