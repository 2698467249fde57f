use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::upstream::UpstreamPayload;

pub const DEFAULT_TYPE: &str = "video";
pub const DEFAULT_TITLE: &str = "Instagram Media";
pub const DEFAULT_USERNAME: &str = "@user";
pub const DEFAULT_DURATION: &str = "00:00";

/// Stable media description returned to clients. Every field is always
/// serialized, nullable ones as `null`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMedia {
    #[serde(rename = "type")]
    pub media_type: String,
    pub thumbnail: Option<String>,
    #[serde(rename = "videoUrl")]
    pub video_url: Option<String>,
    pub title: String,
    pub username: String,
    pub duration: String,
}

// Source fields per output, as JSON pointers, highest precedence first.
const THUMBNAIL_SOURCES: &[&str] = &["/thumbnail_url", "/display_url"];
const VIDEO_URL_SOURCES: &[&str] = &["/video_url", "/download_url"];
const TITLE_SOURCES: &[&str] = &["/title"];
const USERNAME_SOURCES: &[&str] = &["/owner/username"];
const DURATION_SOURCES: &[&str] = &["/video_duration"];

/// Map a provider payload onto [`NormalizedMedia`]. Never fails: anything
/// missing resolves to its default.
pub fn normalize(payload: &UpstreamPayload, requested_format: Option<&str>) -> NormalizedMedia {
    let media_type = requested_format
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_TYPE)
        .to_string();

    let media = NormalizedMedia {
        media_type,
        thumbnail: first_present(payload, THUMBNAIL_SOURCES),
        video_url: first_present(payload, VIDEO_URL_SOURCES),
        title: first_present(payload, TITLE_SOURCES).unwrap_or_else(|| DEFAULT_TITLE.into()),
        username: first_present(payload, USERNAME_SOURCES)
            .unwrap_or_else(|| DEFAULT_USERNAME.into()),
        duration: first_present(payload, DURATION_SOURCES)
            .unwrap_or_else(|| DEFAULT_DURATION.into()),
    };

    debug!(
        "Normalized media: type={} thumbnail={} video={}",
        media.media_type,
        media.thumbnail.is_some(),
        media.video_url.is_some()
    );
    media
}

/// Text of the first source pointer that holds a usable value.
/// A missing parent object simply fails the pointer lookup.
fn first_present(payload: &Value, sources: &[&str]) -> Option<String> {
    sources
        .iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(as_text))
}

/// Scalar-to-text with falsy values (`null`, `false`, `0`, `""`) treated
/// as absent. Arrays and objects are never usable as text.
fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payload_yields_defaults() {
        let media = normalize(&json!({}), None);
        assert_eq!(
            serde_json::to_value(&media).unwrap(),
            json!({
                "type": "video",
                "thumbnail": null,
                "videoUrl": null,
                "title": "Instagram Media",
                "username": "@user",
                "duration": "00:00"
            })
        );
    }

    #[test]
    fn test_thumbnail_precedence() {
        let media = normalize(&json!({"thumbnail_url": "A", "display_url": "B"}), None);
        assert_eq!(media.thumbnail.as_deref(), Some("A"));

        let media = normalize(&json!({"display_url": "B"}), None);
        assert_eq!(media.thumbnail.as_deref(), Some("B"));
    }

    #[test]
    fn test_video_url_falls_back_to_download_url() {
        let media = normalize(&json!({"video_url": "", "download_url": "D"}), None);
        assert_eq!(media.video_url.as_deref(), Some("D"));

        let media = normalize(&json!({"video_url": "V", "download_url": "D"}), None);
        assert_eq!(media.video_url.as_deref(), Some("V"));
    }

    #[test]
    fn test_full_payload() {
        let payload = json!({
            "thumbnail_url": "https://cdn.example/t.jpg",
            "video_url": "https://cdn.example/v.mp4",
            "title": "Sunset",
            "owner": {"username": "alice"},
            "video_duration": "00:42"
        });
        let media = normalize(&payload, Some("audio"));
        assert_eq!(
            media,
            NormalizedMedia {
                media_type: "audio".into(),
                thumbnail: Some("https://cdn.example/t.jpg".into()),
                video_url: Some("https://cdn.example/v.mp4".into()),
                title: "Sunset".into(),
                username: "alice".into(),
                duration: "00:42".into(),
            }
        );
    }

    #[test]
    fn test_missing_or_malformed_owner() {
        assert_eq!(normalize(&json!({"owner": null}), None).username, "@user");
        assert_eq!(normalize(&json!({"owner": "alice"}), None).username, "@user");
        assert_eq!(normalize(&json!({"owner": {}}), None).username, "@user");
    }

    #[test]
    fn test_empty_format_defaults_to_video() {
        assert_eq!(normalize(&json!({}), Some("")).media_type, "video");
    }

    #[test]
    fn test_numeric_duration_rendered_as_text() {
        assert_eq!(
            normalize(&json!({"video_duration": 12.5}), None).duration,
            "12.5"
        );
        assert_eq!(normalize(&json!({"video_duration": 0}), None).duration, "00:00");
    }

    #[test]
    fn test_non_scalar_sources_are_skipped() {
        let media = normalize(
            &json!({"thumbnail_url": {"src": "x"}, "display_url": "B", "title": ["t"]}),
            None,
        );
        assert_eq!(media.thumbnail.as_deref(), Some("B"));
        assert_eq!(media.title, "Instagram Media");
    }
}
