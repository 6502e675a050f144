use std::collections::HashSet;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

/// Placeholder title the server's scraper returns for pages without one.
pub const UNTITLED: &str = "untitled (unfiled)";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bookmark {
    pub id: u64,
    pub url: String,
    pub title: String,
    pub desc: String,
    #[serde(deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_visit: String,
    pub visit_count: u32,
    pub favorite: bool,
    pub favicon_url: String,
    pub archive_url: String,
    pub archive_timestamp: String,
    pub last_checked: String,
    pub status_code: u16,
    pub status_text: String,
    pub is_active: bool,
    pub notes: String,
}

impl Bookmark {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    pub fn domain(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.trim_start_matches("www.").to_string()))
            .unwrap_or_default()
    }

    pub fn tags_label(&self) -> String {
        self.tags
            .iter()
            .map(|tag| format!("#{tag}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = tag.trim().trim_start_matches('#');
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus::from_code(self.status_code)
    }
}

/// Bookmark payload for `POST /api/{db}/bookmarks/new`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub url: String,
    pub title: String,
    pub desc: String,
    pub favicon_url: String,
    pub tags: Vec<String>,
}

/// Response of `POST /api/scrape`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScrapeResult {
    pub title: String,
    pub desc: String,
    #[serde(deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    pub favicon_url: String,
    pub archive_url: String,
}

/// Response of `POST /api/archive`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArchiveSnapshot {
    pub url: String,
    pub archive_url: String,
    pub archive_timestamp: String,
}

/// Response of `POST /api/qr`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QrPayload {
    pub url: String,
    pub base64: String,
    pub mime: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepoStats {
    pub name: String,
    pub bookmarks: usize,
    pub tags: usize,
    pub favorites: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Unknown,
    Ok,
    Redirect,
    Error,
}

impl LinkStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => LinkStatus::Unknown,
            200..=299 => LinkStatus::Ok,
            300..=399 => LinkStatus::Redirect,
            _ if code >= 400 => LinkStatus::Error,
            _ => LinkStatus::Unknown,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagsRepr {
    List(Vec<String>),
    Joined(String),
    Missing(Option<()>),
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match TagsRepr::deserialize(deserializer)? {
        TagsRepr::List(list) => list
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        TagsRepr::Joined(joined) => parse_tags(&joined),
        TagsRepr::Missing(_) => Vec::new(),
    })
}

/// Splits user input on whitespace and commas, strips `#`, drops duplicates
/// while keeping the first spelling.
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|raw| raw.trim().trim_start_matches('#'))
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Formats tags the way the tag field shows them: `"a, b, "`.
pub fn format_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let mut out = tags.join(", ");
    out.push_str(", ");
    out
}

pub fn is_valid_url(raw: &str) -> bool {
    Url::parse(raw.trim())
        .map(|url| url.has_host() || url.scheme() == "file")
        .unwrap_or(false)
}

static TRACKING_PARAMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content", "gclid",
        "fbclid", "msclkid", "dclid", "yclid", "_hsenc", "_hsmi", "mc_cid", "mc_eid", "ga",
        "_ga", "_gac", "scid", "sessionid", "sid", "phpsessid", "ref", "refid", "refsrc",
        "cid", "affid", "cb", "_", "nocache", "rand", "ts", "t", "v", "exp", "experiment",
        "variant", "ab", "abtest", "split", "testgroup", "aff_source", "partnerid", "srcid",
        "campaignid", "adid", "adgroupid", "source", "medium", "campaign", "term", "content",
        "_branch_match_id", "igshid", "share", "at_medium", "at_campaign", "wt_mc_id",
        "wt_mc_ev", "trk", "trkid", "li_fat_id", "vero_conv", "vero_id", "pk_source",
        "pk_medium", "pk_campaign", "email", "hash", "amp_js_v", "amp_gsa", "usqp", "sa",
        "ved", "usg", "cd", "cad", "rct", "ei", "biw", "bih",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedUrl {
    pub url: String,
    pub removed: Vec<String>,
}

/// Drops tracking, session and cache-buster query parameters.
pub fn clean_url(raw: &str) -> Result<CleanedUrl, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    let mut removed = Vec::new();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(key, value)| {
            if TRACKING_PARAMS.contains(key.to_lowercase().as_str()) {
                removed.push(key.into_owned());
                None
            } else {
                Some((key.into_owned(), value.into_owned()))
            }
        })
        .collect();

    if !removed.is_empty() {
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    Ok(CleanedUrl {
        url: url.to_string(),
        removed,
    })
}

/// Parses the server's timestamps (`20060102150405` or RFC 3339).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// `Jan. 2, 2006, 3:04 p.m.`; unparseable input is returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    let Some(parsed) = parse_timestamp(raw) else {
        return raw.to_string();
    };
    let local = parsed.with_timezone(&Local);
    let meridiem = if local.format("%p").to_string() == "AM" {
        "a.m."
    } else {
        "p.m."
    };
    format!("{} {}", local.format("%b. %-d, %Y, %-I:%M"), meridiem)
}

/// Day-granular relative time ("today", "3 days ago", ...).
pub fn relative_time(raw: &str, now: DateTime<Utc>) -> String {
    let Some(parsed) = parse_timestamp(raw) else {
        return String::new();
    };
    let then = parsed.with_timezone(&Local).date_naive();
    let today = now.with_timezone(&Local).date_naive();
    let days = (today - then).num_days();
    match days {
        d if d < 0 => "in the future".to_string(),
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        d if d < 7 => format!("{d} days ago"),
        d if d < 14 => "1 week ago".to_string(),
        d if d < 28 => format!("{} weeks ago", d / 7),
        d if d < 60 => "1 month ago".to_string(),
        d if d < 365 => format!("{} months ago", d / 30),
        d if d < 730 => "1 year ago".to_string(),
        d if d < 365 * 20 => format!("{} years ago", d / 365),
        _ => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_accept_list_or_joined_string() {
        let from_list: Bookmark =
            serde_json::from_str(r#"{"id":1,"url":"https://a.io","tags":["rust"," cli "]}"#)
                .unwrap();
        assert_eq!(from_list.tags, vec!["rust", "cli"]);

        let from_str: Bookmark =
            serde_json::from_str(r#"{"id":2,"url":"https://b.io","tags":"rust,cli,"}"#).unwrap();
        assert_eq!(from_str.tags, vec!["rust", "cli"]);

        let missing: Bookmark = serde_json::from_str(r#"{"id":3,"tags":null}"#).unwrap();
        assert!(missing.tags.is_empty());
    }

    #[test]
    fn parse_tags_splits_and_dedups() {
        assert_eq!(
            parse_tags("#rust, cli  Rust,,tui"),
            vec!["rust".to_string(), "cli".to_string(), "tui".to_string()]
        );
        assert_eq!(format_tags(&parse_tags("a b")), "a, b, ");
        assert_eq!(format_tags(&[]), "");
    }

    #[test]
    fn clean_url_strips_tracking_params() {
        let cleaned =
            clean_url("https://example.com/post?id=7&utm_source=feed&fbclid=xyz").unwrap();
        assert_eq!(cleaned.url, "https://example.com/post?id=7");
        assert_eq!(cleaned.removed, vec!["utm_source", "fbclid"]);

        let bare = clean_url("https://example.com/?utm_medium=x").unwrap();
        assert_eq!(bare.url, "https://example.com/");
        assert!(clean_url("not a url").is_err());
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("  http://localhost:8080/x "));
        assert!(!is_valid_url("example"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn link_status_ranges() {
        assert_eq!(LinkStatus::from_code(0), LinkStatus::Unknown);
        assert_eq!(LinkStatus::from_code(204), LinkStatus::Ok);
        assert_eq!(LinkStatus::from_code(301), LinkStatus::Redirect);
        assert_eq!(LinkStatus::from_code(404), LinkStatus::Error);
    }

    #[test]
    fn timestamps_in_both_layouts() {
        assert!(parse_timestamp("20240102030405").is_some());
        assert!(parse_timestamp("2024-01-02T03:04:05Z").is_some());
        assert_eq!(format_timestamp("garbage"), "garbage");
        let now = parse_timestamp("2024-01-10T12:00:00Z").unwrap();
        assert_eq!(relative_time("2024-01-10T12:00:00Z", now), "today");
        assert_eq!(relative_time("2023-12-20T12:00:00Z", now), "3 weeks ago");
        assert_eq!(relative_time("", now), "");
    }
}
