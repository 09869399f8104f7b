//! Path and URI Resolution
//!
//! Pure string utilities plus stat-based type queries. Everything here is
//! total: bad input yields an empty string or `false`, never an error, so the
//! per-record loop in the orchestrator keeps moving.
//!
//! URIs handled by the engine look like
//!
//! ```text
//! file://<authority>/<percent-encoded path>[?networkid=<routing id>]
//! ```
//!
//! The `networkid` query parameter is the routing marker: its presence means
//! the content lives on another device and must go through the remote
//! transfer service.

use std::path::Path;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// URI scheme prefix for file content
pub const FILE_SCHEME: &str = "file://";

/// Query key carrying the remote device routing id
pub const ROUTING_KEY: &str = "networkid";

/// Characters left unescaped when building a URI path
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Normalize a path string without touching the filesystem.
///
/// Drops empty and `.` segments, pops the previous segment on `..` and keeps
/// a leading root. `..` above the root is discarded.
pub fn canonicalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Whether `path` exists and is a directory (symlinks followed)
pub fn is_directory(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Whether `path` exists and is a regular file (symlinks followed)
pub fn is_file(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Whether the URI carries the cross-device routing marker.
///
/// Purely syntactic; no service is consulted.
pub fn is_remote_addressed(uri: &str) -> bool {
    !extract_routing_id(uri).is_empty()
}

/// Value of the `networkid` query parameter, empty when absent
pub fn extract_routing_id(uri: &str) -> String {
    let Some((_, query)) = uri.split_once('?') else {
        return String::new();
    };
    let query = query.split('#').next().unwrap_or_default();

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == ROUTING_KEY)
        .map(|(_, value)| percent_decode_str(value).decode_utf8_lossy().into_owned())
        .unwrap_or_default()
}

/// Authority component of a file URI, empty for anything else
pub fn uri_authority(uri: &str) -> String {
    let Some(rest) = uri.strip_prefix(FILE_SCHEME) else {
        return String::new();
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    rest[..end].to_string()
}

/// Real path referenced by a file URI.
///
/// The path is percent-decoded and canonicalized; query and fragment are
/// dropped. Returns an empty string if `uri` is not a file URI.
pub fn uri_to_path(uri: &str) -> String {
    let Some(rest) = uri.strip_prefix(FILE_SCHEME) else {
        return String::new();
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let raw_path = match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    };

    let decoded = percent_decode_str(raw_path).decode_utf8_lossy();
    canonicalize(&decoded)
}

/// Build a file URI for `path` under `authority`
pub fn path_to_uri(authority: &str, path: impl AsRef<Path>) -> String {
    let path = path.as_ref().to_string_lossy();
    let path = canonicalize(&path);
    let encoded = utf8_percent_encode(&path, PATH_ENCODE_SET);
    format!("{FILE_SCHEME}{authority}{encoded}")
}

/// Last path segment, empty for the root or an empty path
pub fn file_name(path: &str) -> String {
    canonicalize(path)
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
