//! User-Agent string sent with every site request.

/// Project URL so site operators can identify the traffic.
const PROJECT_UA_URL: &str = "https://github.com/fierce/language101";

/// Default User-Agent for page and media requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("language101/{version} (course-archiver; +{PROJECT_UA_URL})")
}
