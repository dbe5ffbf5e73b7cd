//! Command line driver: single-file inspection, directory clustering and
//! on-disk cluster materialisation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::warn;
use serde_json::{Map, Value};

use vba_imphash::compute_imphash;

const CLUSTERS_REPORT: &str = "vba_imphash_clusters.json";
const IMPORTS_REPORT: &str = "imphash_identifiers.json";
const NON_IMPORTS_REPORT: &str = "non_imphash_identifiers.json";

fn usage(argv0: &str) {
    eprintln!(
        "Usage:\n\
         1) Import hash and identifiers for a single file:\n\
         \x20  {argv0} <file>\n\
         2) Cluster a directory of files by import hash:\n\
         \x20  {argv0} <dir>\n\
         \x20  writes {CLUSTERS_REPORT}, {IMPORTS_REPORT} and\n\
         \x20  {NON_IMPORTS_REPORT} into the working directory\n\
         3) Cluster and copy the files into per-hash subdirectories:\n\
         \x20  {argv0} <dir> <clusters-dest-dir>"
    );
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    match args.len() {
        2 if Path::new(&args[1]).is_file() => {
            inspect_single_file(Path::new(&args[1]));
            ExitCode::SUCCESS
        }
        2 if Path::new(&args[1]).is_dir() => cluster_directory(Path::new(&args[1]), None),
        3 if Path::new(&args[1]).is_dir() => {
            cluster_directory(Path::new(&args[1]), Some(Path::new(&args[2])))
        }
        _ => {
            usage(args.first().map(String::as_str).unwrap_or("vba-imphash"));
            ExitCode::from(2)
        }
    }
}

fn inspect_single_file(path: &Path) {
    let result = compute_imphash(path);
    println!("Import identifiers: {:?}.", result.imports);
    println!("NON-Import identifiers: {:?}.", result.others);
    println!("VBA import hash = {}.", result.hash);
}

fn cluster_directory(dir: &Path, dest: Option<&Path>) -> ExitCode {
    let mut clusters: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut import_counts: HashMap<String, u64> = HashMap::new();
    let mut other_counts: HashMap<String, u64> = HashMap::new();

    for path in files_in_dir(dir) {
        let result = compute_imphash(&path);
        if !clusters.contains_key(&result.hash) {
            println!(
                "File {} has the vba imphash {} from the identifiers {:?}.",
                path.display(),
                result.hash,
                result.imports
            );
        }
        clusters.entry(result.hash).or_default().push(path);
        for name in result.imports {
            *import_counts.entry(name).or_insert(0) += 1;
        }
        for name in result.others {
            *other_counts.entry(name).or_insert(0) += 1;
        }
    }

    // smallest clusters first
    let mut clusters: Vec<(String, Vec<PathBuf>)> = clusters.into_iter().collect();
    clusters.sort_by_key(|(_, files)| files.len());

    println!();
    for (i, (hash, files)) in clusters.iter().enumerate() {
        let names: Vec<&str> = files
            .iter()
            .filter_map(|f| f.file_name().and_then(|n| n.to_str()))
            .collect();
        println!(
            "{}) Cluster {hash}. Len = {}.\nFiles: {names:?}",
            i + 1,
            files.len()
        );
    }

    if let Err(e) = save_reports(&clusters, import_counts, other_counts) {
        warn!("cannot write reports: {e}");
    }

    if let Some(dest) = dest {
        materialize_clusters(&clusters, dest);
    }
    ExitCode::SUCCESS
}

fn files_in_dir(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            warn!("cannot list {}: {e}", dir.display());
            Vec::new()
        }
    };
    files.sort();
    files
}

fn save_reports(
    clusters: &[(String, Vec<PathBuf>)],
    import_counts: HashMap<String, u64>,
    other_counts: HashMap<String, u64>,
) -> std::io::Result<()> {
    let mut map = Map::new();
    for (hash, files) in clusters {
        let files: Vec<Value> = files
            .iter()
            .map(|f| Value::from(f.display().to_string()))
            .collect();
        map.insert(hash.clone(), Value::from(files));
    }
    write_json(CLUSTERS_REPORT, &Value::from(map))?;
    write_json(IMPORTS_REPORT, &counts_to_json(import_counts))?;
    write_json(NON_IMPORTS_REPORT, &counts_to_json(other_counts))
}

/// Identifier -> occurrence count, rarest first.
fn counts_to_json(counts: HashMap<String, u64>) -> Value {
    let mut counts: Vec<(String, u64)> = counts.into_iter().collect();
    counts.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    let mut map = Map::new();
    for (name, n) in counts {
        map.insert(name, Value::from(n));
    }
    Value::from(map)
}

fn write_json(path: &str, value: &Value) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn materialize_clusters(clusters: &[(String, Vec<PathBuf>)], dest: &Path) {
    for (hash, files) in clusters {
        let cluster_dir = dest.join(format!("{:05}_{hash}", files.len()));
        if let Err(e) = fs::create_dir_all(&cluster_dir) {
            warn!("cannot create {}: {e}", cluster_dir.display());
            continue;
        }
        for file in files {
            let Some(name) = file.file_name() else {
                continue;
            };
            if let Err(e) = fs::copy(file, cluster_dir.join(name)) {
                warn!("cannot copy {}: {e}", file.display());
            }
        }
    }
}
