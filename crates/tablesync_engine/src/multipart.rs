//! Multipart encoding for attachment batch transfer.
//!
//! Each part carries one file; the part's `Content-Disposition` filename
//! is the row-relative path and is the only key used to demultiplex parts
//! on receipt. Part order is not significant.

use crate::error::{SyncError, SyncResult};
use crate::transport::AttachmentFile;

/// Content type header value for an encoded batch with this boundary.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

/// Generates a boundary unlikely to collide with file content.
pub fn make_boundary() -> String {
    format!("tablesync-{}", uuid::Uuid::new_v4().simple())
}

/// Encodes files into one multipart body.
pub fn encode_batch(boundary: &str, files: &[AttachmentFile]) -> Vec<u8> {
    let mut body = Vec::new();
    for file in files {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: file; filename=\"{}\"\r\n",
                file.relative_path
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        body.extend_from_slice(format!("Content-Length: {}\r\n", file.content.len()).as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&file.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Decodes a multipart body into files, keyed by disposition filename.
pub fn decode_batch(boundary: &str, body: &[u8]) -> SyncResult<Vec<AttachmentFile>> {
    let delimiter = format!("--{boundary}");
    let mut files = Vec::new();

    for raw_part in split(body, delimiter.as_bytes()) {
        // The terminator after the final delimiter.
        if raw_part.starts_with(b"--") {
            break;
        }
        // Exactly one CRLF ends the delimiter line; everything past it
        // belongs to the part.
        let part = raw_part.strip_prefix(b"\r\n").ok_or_else(|| {
            SyncError::Protocol("multipart delimiter not followed by CRLF".into())
        })?;
        let split_at = find(part, b"\r\n\r\n").ok_or_else(|| {
            SyncError::Protocol("multipart part missing header terminator".into())
        })?;
        let headers = &part[..split_at];
        // The encoder emits exactly one CRLF after the content; stripping
        // any more would truncate files that themselves end in CRLF.
        let content = part[split_at + 4..].strip_suffix(b"\r\n").ok_or_else(|| {
            SyncError::Protocol("multipart part content missing trailing CRLF".into())
        })?;

        let filename = parse_filename(headers).ok_or_else(|| {
            SyncError::Protocol("multipart part missing disposition filename".into())
        })?;
        files.push(AttachmentFile {
            relative_path: filename,
            content: content.to_vec(),
        });
    }
    Ok(files)
}

fn parse_filename(headers: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(headers).ok()?;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        let marker = "filename=\"";
        let start = value.find(marker)? + marker.len();
        let end = value[start..].find('"')? + start;
        return Some(value[start..end].to_string());
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = body;
    while let Some(idx) = find(rest, delimiter) {
        parts.push(&rest[..idx]);
        rest = &rest[idx + delimiter.len()..];
    }
    parts.push(rest);
    // The preamble before the first delimiter is not a part.
    parts.drain(..1);
    parts
}
