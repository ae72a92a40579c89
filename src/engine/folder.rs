// Folder ingestion: expand a directory job into one encode job per
// video file found inside it

use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::job::{Job, JobParams};
use super::probe::{detect_crop, probe_duration};
use crate::config::EnginePaths;

/// Default video file extensions to scan for
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "flv", "m4v", "wmv", "ts"];

/// Check if a path has a video file extension
pub fn is_video_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            return VIDEO_EXTENSIONS.contains(&ext_str.to_lowercase().as_str());
        }
    }
    false
}

/// Scan a directory for video files and invoke a callback for each
/// one. `recursive` off limits the scan to the top level.
pub fn scan_streaming<F>(root: &Path, recursive: bool, mut on_file: F) -> Result<()>
where
    F: FnMut(PathBuf),
{
    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && is_video_file(path) {
            on_file(path.to_path_buf());
        }
    }

    Ok(())
}

/// Scan a directory for video files, sorted for stable submission order
pub fn scan(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    scan_streaming(root, recursive, |path| files.push(path))?;
    files.sort();
    Ok(files)
}

/// Derive an output path inside `output_dir` for one discovered input,
/// renaming on collision so two inputs with the same stem (from
/// different subdirectories) never overwrite each other
pub fn derive_output_path(
    input: &Path,
    output_dir: &Path,
    container: &str,
    taken: &mut HashSet<PathBuf>,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let mut candidate = output_dir.join(format!("{stem}.{container}"));
    let mut counter = 1u32;
    while taken.contains(&candidate) || candidate.exists() {
        candidate = output_dir.join(format!("{stem}_{counter}.{container}"));
        counter += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

/// Settings applied to every child built from a folder
pub struct FolderExpansion {
    pub paths: EnginePaths,
    pub output_dir: PathBuf,
    pub params: JobParams,
    pub recursive: bool,
    pub auto_crop: bool,
}

impl FolderExpansion {
    /// Build one encode job per video file under `root`. A file that
    /// fails to probe is skipped with a warning; the rest of the
    /// folder still goes through.
    pub fn expand(&self, root: &Path) -> Result<Vec<Arc<Job>>> {
        let files = scan(root, self.recursive)?;
        debug!(folder = %root.display(), count = files.len(), "expanding folder");

        let mut taken = HashSet::new();
        let mut jobs = Vec::new();
        for input in files {
            let duration_s = match probe_duration(&self.paths, &input) {
                Ok(d) => d,
                Err(e) => {
                    warn!(file = %input.display(), "probe failed, skipping: {e:#}");
                    continue;
                }
            };

            let mut params = self.params.clone();
            if self.auto_crop {
                match detect_crop(&self.paths, &input) {
                    Ok(Some(crop)) => {
                        params.video_args.push("-vf".to_string());
                        params.video_args.push(crop.filter_arg());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(file = %input.display(), "crop detection failed: {e:#}");
                    }
                }
            }

            let output =
                derive_output_path(&input, &self.output_dir, &params.container, &mut taken);
            jobs.push(Arc::new(
                Job::new(input, output, params).with_duration(duration_s),
            ));
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/movie.mkv")));
        assert!(is_video_file(Path::new("/media/MOVIE.MP4")));
        assert!(!is_video_file(Path::new("/media/notes.txt")));
        assert!(!is_video_file(Path::new("/media/noext")));
    }

    #[test]
    fn test_scan_depth() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.mkv"), b"x").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/b.mp4"), b"x").unwrap();
        fs::write(temp.path().join("readme.txt"), b"x").unwrap();

        let deep = scan(temp.path(), true).unwrap();
        assert_eq!(deep.len(), 2);

        let shallow = scan(temp.path(), false).unwrap();
        assert_eq!(shallow.len(), 1);
        assert!(shallow[0].ends_with("a.mkv"));
    }

    #[test]
    fn test_output_names_stay_unique() {
        let temp = TempDir::new().unwrap();
        let mut taken = HashSet::new();

        let first = derive_output_path(
            Path::new("/in/one/show.mkv"),
            temp.path(),
            "mkv",
            &mut taken,
        );
        let second = derive_output_path(
            Path::new("/in/two/show.mkv"),
            temp.path(),
            "mkv",
            &mut taken,
        );
        assert!(first.ends_with("show.mkv"));
        assert!(second.ends_with("show_1.mkv"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_existing_output_forces_rename() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("show.mkv"), b"x").unwrap();

        let mut taken = HashSet::new();
        let out = derive_output_path(Path::new("/in/show.avi"), temp.path(), "mkv", &mut taken);
        assert!(out.ends_with("show_1.mkv"));
    }
}
