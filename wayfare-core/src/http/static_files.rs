//! Static file resolver (§4.7): resolves a URL sub-path to a file under a
//! base directory, probing index names for directories and rejecting any
//! path that would escape the base.

use std::{
    fs,
    path::{Path, PathBuf},
};

use super::{
    response::{Producer, ResponseMeta},
    Handler, HandlerRequest, HandlerResponse,
};

#[derive(Debug, Clone)]
pub enum ResolveError {
    UnableToFindIndexFile(PathBuf),
    FileDoesNotExist(PathBuf),
    IsNotAFile(PathBuf),
    Forbidden,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::UnableToFindIndexFile(dir) => {
                write!(f, "no index file found under {}", dir.display())
            }
            ResolveError::FileDoesNotExist(path) => {
                write!(f, "file does not exist: {}", path.display())
            }
            ResolveError::IsNotAFile(path) => {
                write!(f, "not a regular file: {}", path.display())
            }
            ResolveError::Forbidden => write!(f, "path escapes the static file base directory"),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Resolve `sub_path` (already percent-decoded, forward-slash-joined
/// segments) against `base`, trying `index_names` in order if the target is
/// a directory. Every candidate is canonicalized and checked to still live
/// under the canonicalized base before being trusted — this is what catches
/// both `..` traversal and symlink escapes.
pub fn resolve(
    base: &Path,
    sub_path: &[String],
    index_names: &[String],
) -> Result<PathBuf, ResolveError> {
    let canonical_base = std::fs::canonicalize(base).map_err(|_| ResolveError::Forbidden)?;

    let mut candidate = base.to_path_buf();
    for segment in sub_path {
        if segment == ".." || segment == "." {
            return Err(ResolveError::Forbidden);
        }
        candidate.push(segment);
    }

    let metadata = match std::fs::symlink_metadata(&candidate) {
        Ok(m) => m,
        Err(_) => return Err(ResolveError::FileDoesNotExist(candidate)),
    };

    if metadata.is_dir() {
        for name in index_names {
            let index_candidate = candidate.join(name);
            if let Ok(canonical) = std::fs::canonicalize(&index_candidate) {
                if canonical.starts_with(&canonical_base) && canonical.is_file() {
                    return Ok(canonical);
                }
            }
        }
        return Err(ResolveError::UnableToFindIndexFile(candidate));
    }

    let canonical = std::fs::canonicalize(&candidate).map_err(|_| ResolveError::Forbidden)?;
    if !canonical.starts_with(&canonical_base) {
        return Err(ResolveError::Forbidden);
    }
    if !canonical.is_file() {
        return Err(ResolveError::IsNotAFile(candidate));
    }
    Ok(canonical)
}

/// A ready-made [`Handler`] that serves one pre-resolved sub-path under a
/// base directory, re-running [`resolve`] (escape/symlink checks included)
/// on every request rather than trusting the discovery walk that picked
/// this sub-path out. Built by the facade crate's
/// `GroupBuilder::static_files`, one per file (or directory, for
/// index-fallback) discovered under the served tree — the route table only
/// matches literal path segments, so serving a directory tree means
/// registering one declaration per discoverable entry up front rather than
/// a wildcard route.
#[derive(Clone)]
pub struct StaticFileHandler {
    base: PathBuf,
    sub_path: Vec<String>,
    index_names: Vec<String>,
}

impl StaticFileHandler {
    pub fn new(base: impl Into<PathBuf>, sub_path: Vec<String>, index_names: Vec<String>) -> Self {
        Self {
            base: base.into(),
            sub_path,
            index_names,
        }
    }
}

impl<Ctx> Handler<Ctx> for StaticFileHandler {
    type Error = std::convert::Infallible;

    async fn handle(&self, _req: HandlerRequest<'_>, _ctx: &Ctx) -> Result<HandlerResponse, Self::Error> {
        match resolve(&self.base, &self.sub_path, &self.index_names) {
            Ok(path) => Ok(HandlerResponse {
                producer: Producer::File { path, range: None },
                meta: ResponseMeta::with_status(200),
            }),
            Err(ResolveError::Forbidden) => Ok(HandlerResponse {
                producer: Producer::String("forbidden".to_string()),
                meta: ResponseMeta::with_status(403),
            }),
            Err(ResolveError::FileDoesNotExist(_)) | Err(ResolveError::UnableToFindIndexFile(_)) => {
                Ok(HandlerResponse {
                    producer: Producer::String("not found".to_string()),
                    meta: ResponseMeta::with_status(404),
                })
            }
            Err(ResolveError::IsNotAFile(_)) => Ok(HandlerResponse {
                producer: Producer::String("not found".to_string()),
                meta: ResponseMeta::with_status(404),
            }),
        }
    }
}

/// Walk `base` recursively, collecting every regular file's path relative to
/// it as a segment list. Symlinks are not followed (matches [`resolve`]'s
/// own canonicalize-and-check-containment policy, applied lazily per
/// request rather than here).
pub fn discover_files(base: &Path) -> std::io::Result<Vec<Vec<String>>> {
    fn walk(dir: &Path, prefix: &[String], out: &mut Vec<Vec<String>>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let mut segments = prefix.to_vec();
            segments.push(entry.file_name().to_string_lossy().into_owned());
            if file_type.is_dir() {
                walk(&entry.path(), &segments, out)?;
            } else if file_type.is_file() {
                out.push(segments);
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    walk(base, &[], &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wayfare-static-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn resolves_a_plain_file() {
        let base = tmp_dir("plain");
        fs::write(base.join("a.txt"), b"hi").unwrap();
        let resolved = resolve(&base, &["a.txt".to_string()], &[]).unwrap();
        assert_eq!(fs::read(resolved).unwrap(), b"hi");
    }

    #[test]
    fn directory_falls_back_to_index_name() {
        let base = tmp_dir("index");
        fs::create_dir_all(base.join("sub")).unwrap();
        fs::write(base.join("sub").join("index.html"), b"home").unwrap();
        let resolved = resolve(
            &base,
            &["sub".to_string()],
            &["index.html".to_string()],
        )
        .unwrap();
        assert_eq!(fs::read(resolved).unwrap(), b"home");
    }

    #[test]
    fn dot_dot_segment_is_rejected_before_touching_disk() {
        let base = tmp_dir("dotdot");
        let err = resolve(&base, &["..".to_string(), "etc".to_string()], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::Forbidden));
    }

    #[test]
    fn missing_file_is_reported() {
        let base = tmp_dir("missing");
        let err = resolve(&base, &["nope.txt".to_string()], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::FileDoesNotExist(_)));
    }

    #[test]
    fn discover_files_walks_nested_directories() {
        let base = tmp_dir("discover");
        fs::write(base.join("a.txt"), b"a").unwrap();
        fs::create_dir_all(base.join("sub")).unwrap();
        fs::write(base.join("sub").join("b.txt"), b"b").unwrap();

        let mut found = discover_files(&base).unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![vec!["a.txt".to_string()], vec!["sub".to_string(), "b.txt".to_string()]]
        );
    }
}
