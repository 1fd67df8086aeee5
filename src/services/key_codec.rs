//! Mapping between the user-scoped virtual path space and flat object keys.
//!
//! A key has the shape `<user>/<seg-1>/.../<seg-n>/<name>`. Encoding joins the
//! parts the way a filesystem path join would (empty and `.` segments dropped,
//! `..` resolved lexically), so `("1", "path/", "a.txt")` and
//! `("1", "./path//", "a.txt")` land on the same key.

use thiserror::Error;

/// Returned when a key does not have the `<user>/.../<name>` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid key `{0}`")]
pub struct InvalidKey(pub String);

/// The three parts a key is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileKey {
    pub user: u64,
    pub path: String,
    pub name: String,
}

/// Build the object key for `name` stored under `path` for `user`.
pub fn encode(user: u64, path: &str, name: &str) -> String {
    join_clean([user.to_string().as_str(), path, name])
}

/// Build the key prefix covering everything `user` stores under `path`.
pub fn encode_prefix(user: u64, path: &str) -> String {
    join_clean([user.to_string().as_str(), path])
}

/// Split a key back into its user, directory path and file name.
pub fn decode(key: &str) -> Result<FileKey, InvalidKey> {
    let parts: Vec<&str> = key.split('/').collect();
    if parts.len() < 2 {
        return Err(InvalidKey(key.to_string()));
    }

    let user = parts[0]
        .parse::<u64>()
        .map_err(|_| InvalidKey(key.to_string()))?;
    let last = parts.len() - 1;

    Ok(FileKey {
        user,
        path: join_clean(parts[1..last].iter().copied()),
        name: parts[last].to_string(),
    })
}

/// Lexical path join: collapses separators, drops `.` and resolves `..`
/// against the preceding segment. Leading `..` that cannot be resolved are kept.
fn join_clean<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in parts.into_iter().flat_map(|part| part.split('/')) {
        match segment {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out.join("/")
}
