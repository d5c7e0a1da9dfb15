use std::fmt;

use thiserror::Error;

/// Host fragments the analysis backend can resolve.
const ACCEPTED_HOSTS: [&str; 2] = ["facebook.com", "fb.com"];

/// Share-wrapper path segments that never resolve to a canonical post.
const SHARE_SEGMENTS: [&str; 2] = ["/share/p/", "/share/r/"];

/// Why a post URL cannot be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PostUrlError {
    #[error("missing URL")]
    Missing,
    /// The backend cannot turn share links into post identifiers, so
    /// submitting one is a guaranteed failure.
    #[error("share links unsupported")]
    ShareLink,
    #[error("not a recognized post URL")]
    UnrecognizedHost,
}

/// A URL that passed [`validate_post_url`], trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostUrl(String);

impl PostUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PostUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classify a user-supplied post URL before anything is sent.
///
/// Rules apply in order: blank input, share links, then unknown hosts.
/// Pure: the same input always yields the same result.
///
/// ```
/// use postpulse::util::{validate_post_url, PostUrlError};
///
/// assert!(validate_post_url("https://facebook.com/Page/posts/123").is_ok());
/// assert_eq!(
///     validate_post_url("https://facebook.com/share/p/abc"),
///     Err(PostUrlError::ShareLink)
/// );
/// ```
pub fn validate_post_url(raw: &str) -> Result<PostUrl, PostUrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PostUrlError::Missing);
    }

    if SHARE_SEGMENTS.iter().any(|seg| trimmed.contains(seg)) {
        return Err(PostUrlError::ShareLink);
    }

    if !ACCEPTED_HOSTS.iter().any(|host| trimmed.contains(host)) {
        return Err(PostUrlError::UnrecognizedHost);
    }

    Ok(PostUrl(trimmed.to_string()))
}

// ============================================================================
// SubmissionForm
// ============================================================================

/// Input state for the "new analysis" form.
///
/// Every edit re-validates, so the warning and the submit button track the
/// text as it is typed rather than only on submit.
#[derive(Debug, Default, Clone)]
pub struct SubmissionForm {
    input: String,
    verdict: Option<Result<PostUrl, PostUrlError>>,
    pending: bool,
}

impl SubmissionForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit(&mut self, input: impl Into<String>) {
        self.input = input.into();
        self.verdict = Some(validate_post_url(&self.input));
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// Warning to show under the input. Untouched forms show none.
    pub fn warning(&self) -> Option<PostUrlError> {
        match &self.verdict {
            Some(Err(e)) => Some(*e),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn can_submit(&self) -> bool {
        !self.pending && matches!(self.verdict, Some(Ok(_)))
    }

    /// Start a submission, returning the URL to send.
    ///
    /// Fails if the input is invalid or a submission is already running.
    pub fn begin_submit(&mut self) -> Option<PostUrl> {
        if !self.can_submit() {
            return None;
        }
        self.pending = true;
        match &self.verdict {
            Some(Ok(url)) => Some(url.clone()),
            _ => None,
        }
    }

    /// End the running submission. A success clears the input.
    pub fn finish_submit(&mut self, succeeded: bool) {
        self.pending = false;
        if succeeded {
            self.input.clear();
            self.verdict = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_documented_cases() {
        assert_eq!(
            validate_post_url("https://facebook.com/share/p/abc"),
            Err(PostUrlError::ShareLink)
        );
        assert_eq!(
            validate_post_url("https://facebook.com/Page/posts/123").map(PostUrl::into_string),
            Ok("https://facebook.com/Page/posts/123".to_string())
        );
        assert_eq!(validate_post_url(""), Err(PostUrlError::Missing));
        assert_eq!(
            validate_post_url("https://example.com"),
            Err(PostUrlError::UnrecognizedHost)
        );
    }

    #[test]
    fn test_whitespace_only_is_missing() {
        assert_eq!(validate_post_url("   \t\n"), Err(PostUrlError::Missing));
    }

    #[test]
    fn test_share_reel_links_rejected() {
        assert_eq!(
            validate_post_url("https://www.facebook.com/share/r/xyz/"),
            Err(PostUrlError::ShareLink)
        );
    }

    #[test]
    fn test_share_check_precedes_host_check() {
        assert_eq!(
            validate_post_url("https://example.com/share/p/abc"),
            Err(PostUrlError::ShareLink)
        );
    }

    #[test]
    fn test_fb_short_host_accepted_and_trimmed() {
        let url = validate_post_url("  https://fb.com/123/posts/456  ").unwrap();
        assert_eq!(url.as_str(), "https://fb.com/123/posts/456");
    }

    #[test]
    fn test_reason_messages() {
        assert_eq!(PostUrlError::Missing.to_string(), "missing URL");
        assert_eq!(PostUrlError::ShareLink.to_string(), "share links unsupported");
        assert_eq!(
            PostUrlError::UnrecognizedHost.to_string(),
            "not a recognized post URL"
        );
    }

    #[test]
    fn test_form_revalidates_on_each_edit() {
        let mut form = SubmissionForm::new();
        assert_eq!(form.warning(), None);
        assert!(!form.can_submit());

        form.edit("https://facebook.com/share/p/a");
        assert_eq!(form.warning(), Some(PostUrlError::ShareLink));
        assert!(!form.can_submit());

        form.edit("https://facebook.com/page/posts/1");
        assert_eq!(form.warning(), None);
        assert!(form.can_submit());

        form.edit("");
        assert_eq!(form.warning(), Some(PostUrlError::Missing));
        assert!(!form.can_submit());
    }

    #[test]
    fn test_form_blocks_double_submit() {
        let mut form = SubmissionForm::new();
        form.edit("https://facebook.com/page/posts/1");

        let url = form.begin_submit().unwrap();
        assert_eq!(url.as_str(), "https://facebook.com/page/posts/1");
        assert!(form.is_pending());
        assert!(form.begin_submit().is_none());

        form.finish_submit(false);
        assert_eq!(form.input(), "https://facebook.com/page/posts/1");
        assert!(form.can_submit());

        form.begin_submit().unwrap();
        form.finish_submit(true);
        assert_eq!(form.input(), "");
        assert!(!form.can_submit());
    }

    proptest! {
        #[test]
        fn prop_validation_is_deterministic(input in ".{0,80}") {
            prop_assert_eq!(validate_post_url(&input), validate_post_url(&input));
        }

        #[test]
        fn prop_accepted_urls_are_trimmed_and_on_known_host(input in ".{0,80}") {
            if let Ok(url) = validate_post_url(&input) {
                prop_assert_eq!(url.as_str(), input.trim());
                prop_assert!(ACCEPTED_HOSTS.iter().any(|h| url.as_str().contains(h)));
                prop_assert!(!SHARE_SEGMENTS.iter().any(|s| url.as_str().contains(s)));
            }
        }

        #[test]
        fn prop_facebook_post_paths_accepted(page in "[A-Za-z0-9.]{1,20}", id in 1u64..u64::MAX) {
            let url = format!("https://www.facebook.com/{page}/posts/{id}");
            prop_assert!(validate_post_url(&url).is_ok());
        }
    }
}
