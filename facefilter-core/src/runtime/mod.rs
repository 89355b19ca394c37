use std::path::{Path, PathBuf};

/// Platform file name of the ONNX Runtime shared library.
#[cfg(target_os = "macos")]
pub const ORT_LIBRARY_NAME: &str = "libonnxruntime.dylib";
#[cfg(target_os = "windows")]
pub const ORT_LIBRARY_NAME: &str = "onnxruntime.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const ORT_LIBRARY_NAME: &str = "libonnxruntime.so";

/// Resolve and set ORT_DYLIB_PATH at runtime when it is missing or invalid.
///
/// Priority order:
/// 1) Existing ORT_DYLIB_PATH (if file exists)
/// 2) models/onnxruntime*/lib/<library> near the current exe or cwd
/// 3) system library directories
///
/// Must run before the first face-mesh session is built.
pub fn configure_ort_dylib() -> Option<PathBuf> {
    if let Some(existing) = std::env::var_os("ORT_DYLIB_PATH") {
        let existing_path = PathBuf::from(existing);
        if existing_path.is_file() {
            tracing::info!(path = %existing_path.display(), "using ORT_DYLIB_PATH from environment");
            return Some(existing_path);
        }
        tracing::warn!(
            path = %existing_path.display(),
            "ORT_DYLIB_PATH is set but file does not exist; attempting auto-discovery"
        );
    }

    let found = ort_candidates(&search_roots())
        .into_iter()
        .find(|candidate| candidate.is_file());

    match found {
        Some(candidate) => {
            // SAFETY: called from main before any ORT session exists and
            // before the server starts, so no other thread reads the env.
            unsafe {
                std::env::set_var("ORT_DYLIB_PATH", &candidate);
            }
            tracing::info!(path = %candidate.display(), "configured ORT_DYLIB_PATH");
            Some(candidate)
        }
        None => {
            tracing::warn!(
                library = ORT_LIBRARY_NAME,
                "could not locate ONNX Runtime; set ORT_DYLIB_PATH to an official ONNX Runtime build"
            );
            None
        }
    }
}

fn search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }

    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent().map(Path::to_path_buf);
        for _ in 0..4 {
            let Some(d) = dir else {
                break;
            };
            roots.push(d.clone());
            dir = d.parent().map(Path::to_path_buf);
        }
    }

    roots
}

fn ort_candidates(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for root in roots {
        candidates.push(root.join("models/onnxruntime/lib").join(ORT_LIBRARY_NAME));
        candidates.push(root.join("models").join(ORT_LIBRARY_NAME));
        candidates.push(root.join(ORT_LIBRARY_NAME));
    }

    #[cfg(target_os = "macos")]
    candidates.push(PathBuf::from("/opt/homebrew/lib").join(ORT_LIBRARY_NAME));
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        candidates.push(PathBuf::from("/usr/local/lib").join(ORT_LIBRARY_NAME));
        candidates.push(PathBuf::from("/usr/lib").join(ORT_LIBRARY_NAME));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_models_dir_is_searched_first() {
        let roots = vec![PathBuf::from("/srv/app"), PathBuf::from("/opt/other")];
        let candidates = ort_candidates(&roots);

        assert_eq!(
            candidates[0],
            Path::new("/srv/app/models/onnxruntime/lib").join(ORT_LIBRARY_NAME)
        );
        assert!(candidates
            .iter()
            .any(|c| c == &Path::new("/opt/other/models").join(ORT_LIBRARY_NAME)));
        assert!(candidates
            .iter()
            .all(|c| c.file_name().and_then(|n| n.to_str()) == Some(ORT_LIBRARY_NAME)));
    }

    #[test]
    fn discovers_library_in_scratch_root() {
        let dir = tempfile::tempdir().unwrap();
        let lib_dir = dir.path().join("models/onnxruntime/lib");
        std::fs::create_dir_all(&lib_dir).unwrap();
        std::fs::write(lib_dir.join(ORT_LIBRARY_NAME), b"").unwrap();

        let found = ort_candidates(&[dir.path().to_path_buf()])
            .into_iter()
            .find(|c| c.is_file());
        assert_eq!(found, Some(lib_dir.join(ORT_LIBRARY_NAME)));
    }
}
