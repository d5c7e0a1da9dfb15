//! Small helpers shared by the dashboard core and the terminal front end.
//!
//! - **Post URL validation**: classify a submission before anything is sent
//! - **Text processing**: width-aware truncation and terminal sanitization
//!
//! # Examples
//!
//! ```
//! use postpulse::util::{display_width, validate_post_url};
//!
//! let url = validate_post_url(" https://facebook.com/Page/posts/1 ").unwrap();
//! assert_eq!(url.as_str(), "https://facebook.com/Page/posts/1");
//!
//! assert_eq!(display_width("Hello 世界"), 10);
//! ```

mod post_url;
mod text;

pub use post_url::{validate_post_url, PostUrl, PostUrlError, SubmissionForm};
pub use text::{display_width, fit_width, pad_to_width, sanitize_for_terminal};
