use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::ZipArchive;

/// Unpacks offer CSVs out of ZIP archives into a scratch directory that
/// lives as long as the extractor.
pub struct OfferExtractor {
    scratch: TempDir,
    extracted_count: AtomicUsize,
}

impl OfferExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            scratch: TempDir::new()?,
            extracted_count: AtomicUsize::new(0),
        })
    }

    pub fn find_zip_files(dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("zip"))
            })
            .collect()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Extract every CSV found in the archives; returns the extracted paths.
    ///
    /// Each archive unpacks into its own folder, named after its path below
    /// `root`, so archives and entries sharing a file name stay apart.
    pub fn extract_all(&self, root: &Path, zip_files: &[PathBuf]) -> Vec<PathBuf> {
        let extracted = Mutex::new(Vec::new());

        zip_files.par_iter().for_each(|zip_path| {
            match self.extract_zip(root, zip_path) {
                Ok(paths) => {
                    if let Ok(mut all) = extracted.lock() {
                        all.extend(paths);
                    }
                }
                Err(e) => eprintln!("Error extracting {:?}: {}", zip_path, e),
            }
        });

        let mut paths = extracted.into_inner().unwrap_or_default();
        paths.sort();
        paths
    }

    fn extract_zip(&self, root: &Path, zip_path: &Path) -> Result<Vec<PathBuf>> {
        let file = fs::File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to open archive {:?}", zip_path))?;

        let relative = zip_path.strip_prefix(root).unwrap_or(zip_path);
        let target = self
            .scratch
            .path()
            .join(flatten_path(&relative.with_extension(""), "archive"));
        fs::create_dir_all(&target)?;

        let mut paths = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if !entry.name().to_lowercase().ends_with(".csv") {
                continue;
            }
            let Some(name) = entry.enclosed_name().map(|p| flatten_path(p, "offers.csv")) else {
                eprintln!("Skipping unsafe entry {} in {:?}", entry.name(), zip_path);
                continue;
            };
            let output_path = target.join(name);

            let mut output = fs::File::create(&output_path)?;
            std::io::copy(&mut entry, &mut output)?;
            self.extracted_count.fetch_add(1, Ordering::SeqCst);
            paths.push(output_path);
        }

        Ok(paths)
    }

    pub fn extracted_count(&self) -> usize {
        self.extracted_count.load(Ordering::SeqCst)
    }
}

/// Join the normal components of a path with `_`, e.g. `2014/01/offers` to
/// `2014_01_offers`.
pub fn flatten_path(path: &Path, fallback: &str) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        fallback.to_string()
    } else {
        parts.join("_")
    }
}
