/// Path containment and allowed-root resolution
///
/// All sandbox filesystem writes (worker directories, snippet files) and
/// any caller-supplied working directory must live under a single allowed
/// root. Containment is checked lexically so paths that do not exist yet
/// are covered as well.
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Environment variable naming the allowed storage root.
pub const ALLOWED_ROOT_ENV: &str = "PIPEBOX_ALLOWED_ROOT";
/// Environment variable overriding the Python interpreter.
pub const PYTHON_ENV: &str = "PIPEBOX_PYTHON";

const DEFAULT_ALLOWED_ROOT: &str = "/tmp/pipebox_storage";
const DEFAULT_PYTHON: &str = "python3";

static ALLOWED_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Allowed storage root for sandbox payloads and worker directories.
///
/// Read from `PIPEBOX_ALLOWED_ROOT` exactly once per process; later
/// environment changes are ignored.
pub fn allowed_root() -> &'static Path {
    ALLOWED_ROOT.get_or_init(|| {
        let raw = std::env::var(ALLOWED_ROOT_ENV)
            .unwrap_or_else(|_| DEFAULT_ALLOWED_ROOT.to_string());
        normalize_path(Path::new(&raw))
    })
}

/// Python interpreter used for snippet runs.
pub fn python_executable() -> PathBuf {
    std::env::var_os(PYTHON_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PYTHON))
}

/// Absolutize against the current directory and squash `.`/`..` components.
///
/// Purely lexical: the filesystem is not consulted, so symlinks are not
/// resolved and nonexistent paths normalize like any other.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(Component::RootDir.as_os_str());
    }
    normalized
}

/// True when `path` normalizes to a location inside `root`.
pub fn is_safe_path(path: &Path, root: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(root))
}

/// Sanitized basename containing only `[A-Za-z0-9_.-]`; returns `fallback`
/// when nothing usable survives.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|part| part.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_squashes_parent_components() {
        let path = normalize_path(Path::new("/tmp/pipebox_storage/workers/../../etc/passwd"));
        assert_eq!(path, PathBuf::from("/tmp/etc/passwd"));
    }

    #[test]
    fn normalize_keeps_absolute_paths() {
        let path = normalize_path(Path::new("/tmp/./pipebox_storage//workers"));
        assert_eq!(path, PathBuf::from("/tmp/pipebox_storage/workers"));
    }

    #[test]
    fn safe_path_accepts_children() {
        let root = Path::new("/tmp/pipebox_storage");
        assert!(is_safe_path(Path::new("/tmp/pipebox_storage/workers/x"), root));
        assert!(is_safe_path(root, root));
    }

    #[test]
    fn safe_path_rejects_traversal() {
        let root = Path::new("/tmp/pipebox_storage");
        assert!(!is_safe_path(Path::new("/tmp/pipebox_storage/../etc"), root));
        assert!(!is_safe_path(Path::new("/etc/passwd"), root));
        // Sibling with the root as a name prefix is still outside.
        assert!(!is_safe_path(Path::new("/tmp/pipebox_storage_evil"), root));
    }

    #[test]
    fn sanitize_keeps_safe_names() {
        assert_eq!(sanitize_filename("payload-1.json", "fallback"), "payload-1.json");
    }

    #[test]
    fn sanitize_strips_directories_and_unsafe_chars() {
        assert_eq!(sanitize_filename("../../etc/pa ss$wd", "fallback"), "pa_ss_wd");
        assert_eq!(sanitize_filename("", "payload.json"), "payload.json");
    }
}
