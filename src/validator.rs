use std::sync::LazyLock;

use regex_lite::Regex;

static POST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"instagram\.com/(p|reel|tv|stories)/[A-Za-z0-9_-]+")
        .expect("post URL pattern is valid")
});

/// Whether `url` points at an Instagram post, reel, IGTV video or story.
/// Unanchored: scheme, `www.` and trailing query strings are all accepted.
pub fn is_supported_url(url: &str) -> bool {
    POST_URL.is_match(url)
}
