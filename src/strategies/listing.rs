//! Shared parsing of share-service file listings into [`FileDescriptor`]s.
//!
//! The share API, the embedded page state and most relay services all describe
//! files with the same loosely typed JSON objects; the field names differ only
//! slightly between them.

use serde_json::Value;

use crate::extractor::{FileDescriptor, is_video_filename};

const UNKNOWN_FILENAME: &str = "Unknown";

/// Category code the share service uses for videos.
const VIDEO_CATEGORY: u64 = 1;

/// Reads a number that may be encoded as a JSON number or a numeric string.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn json_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Converts one listing entry. Returns `None` for non-objects.
#[must_use]
pub fn parse_file_item(item: &Value) -> Option<FileDescriptor> {
    if !item.is_object() {
        return None;
    }

    let filename = first_str(item, &["server_filename", "filename", "name", "file_name"])
        .unwrap_or(UNKNOWN_FILENAME)
        .to_string();
    let size_bytes = json_u64(item.get("size")).unwrap_or(0);
    let direct_link = first_str(item, &["dlink", "download_url", "direct_link", "link"])
        .unwrap_or_default()
        .to_string();
    let is_video = json_u64(item.get("category")) == Some(VIDEO_CATEGORY)
        || item.get("is_video").and_then(Value::as_bool).unwrap_or(false)
        || is_video_filename(&filename);
    let thumbnail = item
        .get("thumbs")
        .and_then(|thumbs| first_str(thumbs, &["url3", "url2", "url1"]))
        .or_else(|| first_str(item, &["thumbnail"]))
        .map(str::to_string);
    let duration_secs = json_u64(item.get("duration")).filter(|secs| *secs > 0);

    Some(FileDescriptor {
        filename,
        size_bytes,
        is_video,
        direct_link,
        thumbnail,
        duration_secs,
    })
}

/// Converts every object in a JSON array; anything else yields nothing.
#[must_use]
pub fn parse_file_list(list: &Value) -> Vec<FileDescriptor> {
    list.as_array()
        .map(|items| items.iter().filter_map(parse_file_item).collect())
        .unwrap_or_default()
}

/// Returns the first non-empty listing found at any of `paths`.
///
/// Each path is a sequence of object keys, e.g. `["file_list", "list"]`.
#[must_use]
pub fn find_file_list(data: &Value, paths: &[&[&str]]) -> Vec<FileDescriptor> {
    paths
        .iter()
        .filter_map(|path| path.iter().try_fold(data, |node, key| node.get(*key)))
        .map(parse_file_list)
        .find(|files| !files.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_share_api_item() {
        let item = json!({
            "server_filename": "Trip.mkv",
            "size": 1_048_576,
            "dlink": "https://d.example/file?sign=x",
            "category": 1,
            "thumbs": {"url3": "https://t.example/3", "url2": "https://t.example/2"},
            "duration": 125,
        });
        let file = parse_file_item(&item).unwrap();
        assert_eq!(file.filename, "Trip.mkv");
        assert_eq!(file.size_bytes, 1_048_576);
        assert!(file.is_video);
        assert_eq!(file.direct_link, "https://d.example/file?sign=x");
        assert_eq!(file.thumbnail.as_deref(), Some("https://t.example/3"));
        assert_eq!(file.duration_secs, Some(125));
    }

    #[test]
    fn test_parse_relay_item_with_string_size() {
        let item = json!({"name": "notes.pdf", "size": "2048", "download_url": "https://r.example/n"});
        let file = parse_file_item(&item).unwrap();
        assert_eq!(file.filename, "notes.pdf");
        assert_eq!(file.size_bytes, 2048);
        assert!(!file.is_video);
        assert_eq!(file.direct_link, "https://r.example/n");
        assert_eq!(file.thumbnail, None);
        assert_eq!(file.duration_secs, None);
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let file = parse_file_item(&json!({"thumbs": {"url3": "", "url2": "https://t/2"}})).unwrap();
        assert_eq!(file.filename, "Unknown");
        assert_eq!(file.size_bytes, 0);
        assert_eq!(file.direct_link, "");
        assert_eq!(file.thumbnail.as_deref(), Some("https://t/2"));
        assert!(parse_file_item(&json!("not an object")).is_none());
    }

    #[test]
    fn test_find_file_list_takes_first_non_empty_path() {
        let data = json!({
            "shareInfo": {"file_list": {"list": []}},
            "file_list": {"list": [{"server_filename": "a.mp4"}, 7]},
            "list": [{"server_filename": "b.mp4"}],
        });
        let files = find_file_list(
            &data,
            &[&["shareInfo", "file_list", "list"], &["file_list", "list"], &["list"]],
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "a.mp4");

        assert!(find_file_list(&json!({}), &[&["list"]]).is_empty());
    }

    #[test]
    fn test_json_u64_variants() {
        assert_eq!(json_u64(Some(&json!(5))), Some(5));
        assert_eq!(json_u64(Some(&json!(" 12 "))), Some(12));
        assert_eq!(json_u64(Some(&json!(-1))), None);
        assert_eq!(json_u64(Some(&json!(null))), None);
        assert_eq!(json_u64(None), None);
    }
}
