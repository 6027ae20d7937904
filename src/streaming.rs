#![forbid(unsafe_code)]

//! Byte-range file streaming for video playback.
//!
//! Browsers scrub through mp4 files with `Range: bytes=start-end` requests;
//! this module turns a file path plus an optional range header into a 200 or
//! 206 response whose body is fed from disk chunk by chunk, so file size
//! never dictates memory use.

use std::io::SeekFrom;
use std::path::Path;

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

/// Everything served here is a downloaded mp4; mime sniffing would only add
/// a failure mode.
const VIDEO_MIME: &str = "video/mp4";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The file is missing or unreadable at call time. A scheduled cleanup
    /// may have removed it between routing and open.
    #[error("file not found")]
    NotFound,

    /// The Range header could not be parsed. Rejected as a client error
    /// rather than silently serving the whole file.
    #[error("malformed range header: {0}")]
    MalformedRange(String),
}

/// Streams `path`, honoring an optional `bytes=start-end` range header.
///
/// Without a range: 200 with the full body. With a valid range: 206 with
/// `Content-Range` and exactly the requested window (an omitted end means
/// end of file, an end past the file is clamped). A start at or past the
/// file size yields 416 with `Content-Range: bytes */{size}`.
pub async fn stream_video(
    path: &Path,
    range_header: Option<&str>,
) -> Result<Response, StreamError> {
    let mut file = File::open(path).await.map_err(|_| StreamError::NotFound)?;
    let size = file
        .metadata()
        .await
        .map_err(|_| StreamError::NotFound)?
        .len();

    let range = match range_header {
        Some(value) => Some(parse_range_header(value, size)?),
        None => None,
    };

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                format!("bytes */{size}").parse().unwrap(),
            );
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|_| StreamError::NotFound)?;
            let stream = ReaderStream::new(file.take(length));
            let mut response = Body::from_stream(stream).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}").parse().unwrap(),
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, length.to_string().parse().unwrap());
            response
        }
        None => {
            let stream = ReaderStream::new(file);
            let mut response = Body::from_stream(stream).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, size.to_string().parse().unwrap());
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, VIDEO_MIME.parse().unwrap());

    Ok(response)
}

/// Parses `bytes=<start>-<end?>` into an inclusive byte window.
///
/// Suffix form `bytes=-N` resolves to the last N bytes. An omitted end
/// defaults to `size - 1`. The returned end is not yet clamped; callers clamp
/// it so an explicit end past EOF still succeeds per RFC 9110.
fn parse_range_header(value: &str, size: u64) -> Result<(u64, u64), StreamError> {
    let malformed = || StreamError::MalformedRange(value.to_string());

    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(malformed)?
        .trim();
    let (start_str, end_str) = spec.split_once('-').ok_or_else(malformed)?;

    if start_str.is_empty() {
        // Suffix range: last N bytes.
        let suffix_len: u64 = end_str.parse().map_err(|_| malformed())?;
        if suffix_len == 0 {
            return Err(malformed());
        }
        let start = size.saturating_sub(suffix_len);
        return Ok((start, size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().map_err(|_| malformed())?;
    let end = if end_str.is_empty() {
        // An omitted end means "to EOF" even when start is past it; the
        // caller turns that into 416 rather than a parse error.
        size.saturating_sub(1)
    } else {
        let end: u64 = end_str.parse().map_err(|_| malformed())?;
        if end < start {
            return Err(malformed());
        }
        end
    };
    Ok((start, end))
}
