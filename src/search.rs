#![forbid(unsafe_code)]

//! Search against the upstream platform via yt-dlp.
//!
//! Three separable stages: build and run the flat-playlist invocation, parse
//! the newline-delimited JSON it emits, and degrade every failure into an
//! empty-results payload at the HTTP boundary. The parser is deliberately
//! forgiving: yt-dlp output varies by extractor version and a single bad
//! line must never sink a whole search.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::{self, RunnerError};

/// Hard cap on results per search, mirrored in the `ytsearch` selector.
pub const MAX_RESULTS: usize = 20;

const MAX_TITLE_CHARS: usize = 70;
const MAX_UPLOADER_CHARS: usize = 30;
const FALLBACK_UPLOADER: &str = "Unknown";
/// Anything shorter than this is noise (a bare newline, a stray brace), not
/// a result set.
const MIN_USABLE_OUTPUT: usize = 10;

/// One normalized search hit as exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: f64,
    pub uploader: String,
    pub view_count: u64,
}

/// Body of every search response. Failures surface as an empty `results`
/// plus `error`; clients never see a non-200 status for a failed search.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fields we pick out of a yt-dlp JSON line. Everything is optional so that
/// partial flat-playlist entries still deserialize.
#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    view_count: Option<u64>,
}

/// A line is either a video entry or a playlist wrapper holding `entries`.
/// Wrappers can carry their own id/title, so the direct interpretation is
/// tried first and `entries` is only consulted when it yields nothing.
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(flatten)]
    entry: RawEntry,
    entries: Option<Vec<RawEntry>>,
}

/// Runs a flat-playlist search for `query` and returns yt-dlp's raw stdout.
pub async fn search_videos(
    ytdlp_bin: &str,
    query: &str,
    timeout: Duration,
) -> Result<String, RunnerError> {
    runner::run(ytdlp_bin, search_args(query), timeout).await
}

/// Argument list for a lightweight text search: flat-playlist mode keeps
/// yt-dlp from resolving full per-video metadata, which is the difference
/// between one network round-trip and twenty.
pub fn search_args(query: &str) -> Vec<String> {
    vec![
        format!("ytsearch{MAX_RESULTS}:{query}"),
        "--dump-json".to_string(),
        "--no-warnings".to_string(),
        "--flat-playlist".to_string(),
    ]
}

/// Parses yt-dlp's one-JSON-object-per-line output into normalized results.
/// Garbage lines are skipped, order is preserved, and the list is capped at
/// [`MAX_RESULTS`].
pub fn parse_search_output(output: &str) -> Vec<SearchResult> {
    let mut results = Vec::new();
    for line in output.lines() {
        if results.len() >= MAX_RESULTS {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<RawLine>(line) else {
            continue;
        };
        if let Some(result) = shape(&parsed.entry) {
            results.push(result);
            continue;
        }
        if let Some(entries) = &parsed.entries {
            for entry in entries {
                if results.len() >= MAX_RESULTS {
                    break;
                }
                if let Some(result) = shape(entry) {
                    results.push(result);
                }
            }
        }
    }
    results
}

/// Maps a runner outcome to the response body the search endpoint returns.
/// Every failure path degrades to an empty result list; only the optional
/// `error` string distinguishes "nothing matched" from "the tool fell over".
pub fn degrade_to_response(query: &str, outcome: Result<String, RunnerError>) -> SearchResponse {
    let query = query.to_string();
    match outcome {
        Ok(output) if output.len() >= MIN_USABLE_OUTPUT => SearchResponse {
            results: parse_search_output(&output),
            query,
            error: None,
        },
        Ok(_) => SearchResponse {
            results: Vec::new(),
            query,
            error: None,
        },
        Err(err) => SearchResponse {
            results: Vec::new(),
            query,
            error: Some(err.to_string()),
        },
    }
}

/// An entry is usable once it has an id and a title; everything else gets a
/// default. Truncation counts characters, not bytes, so multi-byte titles
/// cannot split a code point.
fn shape(entry: &RawEntry) -> Option<SearchResult> {
    let id = entry.id.as_deref().filter(|id| !id.is_empty())?;
    let title = entry.title.as_deref()?;
    Some(SearchResult {
        video_id: id.to_string(),
        title: truncate_chars(title, MAX_TITLE_CHARS),
        thumbnail: entry
            .thumbnail
            .clone()
            .unwrap_or_else(|| format!("https://i.ytimg.com/vi/{id}/mqdefault.jpg")),
        duration: entry.duration.unwrap_or(0.0),
        uploader: truncate_chars(
            entry.uploader.as_deref().unwrap_or(FALLBACK_UPLOADER),
            MAX_UPLOADER_CHARS,
        ),
        view_count: entry.view_count.unwrap_or(0),
    })
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
