//! Remote URL normalization and identity hashing.

use sha2::{Digest, Sha256};

/// Hash an identity source, folding in the sub-project path if any.
///
/// Input is `source` or `source#subPath`; output is lowercase hex SHA-256.
pub fn identity_hash(source: &str, sub_project_path: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    if let Some(sub) = sub_project_path.filter(|s| !s.is_empty()) {
        hasher.update(b"#");
        hasher.update(sub.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Reduce a VCS remote URL to a canonical `host/path` form.
///
/// `git@github.com:Org/Repo.git`, `ssh://git@github.com/org/repo` and
/// `https://www.github.com/org/repo/` all normalize to
/// `github.com/org/repo`.
pub fn normalize_remote_url(url: &str) -> String {
    let mut s = url.trim().trim_end_matches('/');
    s = strip_suffix_ignore_case(s, ".git").trim_end_matches('/');

    let (host, path) = match s.split_once("://") {
        Some((_, rest)) => match rest.split_once('/') {
            Some((authority, path)) => (host_of(authority), path),
            None => (host_of(rest), ""),
        },
        None => split_scp_like(s),
    };

    let host = host.strip_prefix("www.").unwrap_or(host);
    let path = path.trim_matches('/');
    let joined = if path.is_empty() {
        host.to_string()
    } else {
        format!("{}/{}", host, path)
    };
    joined.to_lowercase()
}

/// `user@host:path` (scp-like SSH) or a bare path
fn split_scp_like(s: &str) -> (&str, &str) {
    match s.split_once(':') {
        Some((authority, path)) if !authority.contains('/') => (host_of(authority), path),
        _ => ("", s),
    }
}

/// Drop userinfo and port from an authority
fn host_of(authority: &str) -> &str {
    let without_user = authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority);
    match without_user.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => without_user,
    }
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> &'a str {
    if s.len() >= suffix.len()
        && s.is_char_boundary(s.len() - suffix.len())
        && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    {
        &s[..s.len() - suffix.len()]
    } else {
        s
    }
}
