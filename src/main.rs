use anyhow::Result;
use chrono::NaiveDateTime;
use fan_calculator::{frames, DataLoader, RecordReshaper};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

mod offer_extractor;

use offer_extractor::{flatten_path, OfferExtractor};

struct FileSummary {
    name: String,
    source_rows: usize,
    offers: usize,
    bands: usize,
    first_period: Option<NaiveDateTime>,
    last_period: Option<NaiveDateTime>,
}

fn process_offer_file(csv_path: &Path, stem: &str, output_dir: &Path) -> Result<FileSummary> {
    let table = DataLoader::new().load_offers(csv_path)?;
    let reshaper = RecordReshaper::new(&table)?;
    let bands = reshaper.band_keys().count();
    let records = reshaper.reshape()?;

    let mut df = frames::offers_to_dataframe(&records)?;
    frames::write_frame(&mut df, output_dir.join(format!("{}_long.parquet", stem)))?;
    frames::write_frame(&mut df, output_dir.join(format!("{}_long.csv", stem)))?;

    Ok(FileSummary {
        name: stem.to_string(),
        source_rows: table.height(),
        offers: records.len(),
        bands,
        first_period: records.iter().map(|r| r.timestamp).min(),
        last_period: records.iter().map(|r| r.timestamp).max(),
    })
}

/// Output stems for a batch of inputs. Each is the file's path below the
/// first matching root, flattened; clashes left over get a numeric suffix.
fn output_stems(files: &[PathBuf], roots: &[&Path]) -> Vec<String> {
    let mut taken = HashSet::new();
    files
        .iter()
        .map(|path| {
            let relative = roots
                .iter()
                .find_map(|root| path.strip_prefix(root).ok())
                .unwrap_or(path.as_path());
            let base = flatten_path(&relative.with_extension(""), "offers");

            let mut stem = base.clone();
            let mut n = 1;
            while !taken.insert(stem.clone()) {
                n += 1;
                stem = format!("{}_{}", base, n);
            }
            stem
        })
        .collect()
}

fn find_offer_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = data_dir.join("**").join("*.csv");
    let files = glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();
    Ok(files)
}

fn main() -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("Usage: offer_processor <input_dir> [output_dir]");
        println!("Example: offer_processor offers/2014 long_offers");
        return Ok(());
    }

    let data_dir = PathBuf::from(&args[1]);
    let output_dir = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("long_offers"));
    std::fs::create_dir_all(&output_dir)?;

    println!("🚀 Offer Reshaping - Rust Processor");
    println!("Using {} CPU cores", num_cpus::get());
    println!("{}", "=".repeat(60));

    let mut offer_files = find_offer_files(&data_dir)?;

    let zip_files = OfferExtractor::find_zip_files(&data_dir);
    let extractor = OfferExtractor::new()?;
    if !zip_files.is_empty() {
        println!("🗜️  Found {} ZIP files, extracting...", zip_files.len());
        offer_files.extend(extractor.extract_all(&data_dir, &zip_files));
        println!("  Extracted {} CSV files", extractor.extracted_count());
    }

    if offer_files.is_empty() {
        println!("❌ No offer files found in {:?}", data_dir);
        return Ok(());
    }

    println!("📊 Found {} offer files to process", offer_files.len());

    let pb = ProgressBar::new(offer_files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let start = std::time::Instant::now();

    let stems = output_stems(&offer_files, &[data_dir.as_path(), extractor.scratch_dir()]);

    let results: Vec<(PathBuf, Result<FileSummary>)> = offer_files
        .par_iter()
        .zip(stems.par_iter())
        .map(|(path, stem)| {
            let result = process_offer_file(path, stem, &output_dir);
            pb.inc(1);
            (path.clone(), result)
        })
        .collect();

    pb.finish_with_message("done");

    let mut failures = 0;
    let mut total_offers = 0;
    for (path, result) in &results {
        match result {
            Ok(summary) => {
                total_offers += summary.offers;
                let span = match (summary.first_period, summary.last_period) {
                    (Some(first), Some(last)) => format!("{} to {}", first, last),
                    _ => "no periods".to_string(),
                };
                println!(
                    "  ✅ {}: {} rows x {} bands -> {} offers ({})",
                    summary.name, summary.source_rows, summary.bands, summary.offers, span
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("  ❌ {:?}: {}", path, e);
            }
        }
    }

    println!("{}", "=".repeat(60));
    println!(
        "✅ Reshaped {} offers from {} files ({} failed) in {:?}",
        total_offers,
        results.len() - failures,
        failures,
        start.elapsed()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_file_names_in_different_folders_get_distinct_outputs() {
        let data = Path::new("offers/2014");
        let scratch = Path::new("/tmp/scratch");
        let files = vec![
            data.join("01/offers.csv"),
            data.join("02/offers.csv"),
            scratch.join("offers_20140101/offers.csv"),
            data.join("01_offers.csv"),
        ];

        let stems = output_stems(&files, &[data, scratch]);
        assert_eq!(
            stems,
            vec!["01_offers", "02_offers", "offers_20140101_offers", "01_offers_2"]
        );
    }

    #[test]
    fn test_processed_outputs_do_not_overwrite_each_other() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let header = "Grid_Injection_Point,Station,Unit,Trading_Date,Trading_Period,Band1_Price,Band1_Power";
        for (folder, rows) in [("01", 1), ("02", 2)] {
            let dir = input.path().join(folder);
            std::fs::create_dir_all(&dir).unwrap();
            let body: Vec<String> = (1..=rows)
                .map(|p| format!("HLY2201,HLY,5,2014-01-01,{},10,5", p))
                .collect();
            std::fs::write(dir.join("offers.csv"), format!("{}\n{}\n", header, body.join("\n")))
                .unwrap();
        }

        let files = find_offer_files(input.path()).unwrap();
        assert_eq!(files.len(), 2);
        let stems = output_stems(&files, &[input.path()]);
        for (path, stem) in files.iter().zip(&stems) {
            process_offer_file(path, stem, output.path()).unwrap();
        }

        for (stem, rows) in [("01_offers", 1), ("02_offers", 2)] {
            let written =
                std::fs::read_to_string(output.path().join(format!("{}_long.csv", stem))).unwrap();
            assert_eq!(written.lines().count(), rows + 1, "{}", stem);
            assert!(output.path().join(format!("{}_long.parquet", stem)).exists());
        }
    }
}
