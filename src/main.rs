//! Image Risk Core - CLI entry point
//!
//! image-risk-core <file|dir>...        analyze images, one JSON line per file
//! image-risk-core rescan <assets.jsonl> re-apply moderation fusion to stored records
//! image-risk-core status               print engine status

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use image_risk_core::api::commands::{self, ImagePayload};
use image_risk_core::constants;
use image_risk_core::logic::config::ConfigStore;
use image_risk_core::logic::moderation::StoredAsset;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Files as given, directories expanded one level (images only, sorted)
fn collect_inputs(args: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for arg in args {
        let path = PathBuf::from(arg);
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(&path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

async fn analyze_paths(args: &[String]) -> Result<()> {
    let files = collect_inputs(args)?;
    if files.is_empty() {
        bail!("no images found");
    }

    let mut payloads = Vec::with_capacity(files.len());
    for file in &files {
        let data = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        payloads.push(ImagePayload {
            data,
            content_type: content_type_for(file).to_string(),
        });
    }

    let results = commands::analyze_batch(payloads).await.map_err(|e| anyhow!(e))?;

    for item in results {
        let path = files[item.index].display().to_string();
        let line = match (item.result, item.error) {
            (Some(result), _) => {
                let name = files[item.index]
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let signals = commands::scan_text(vec![name], None).await.map_err(|e| anyhow!(e))?;
                let verdict = commands::moderate_asset(Some(result.clone()), signals)
                    .await
                    .map_err(|e| anyhow!(e))?;
                json!({ "path": path, "analysis": result, "verdict": verdict })
            }
            (None, error) => json!({ "path": path, "error": error }),
        };
        println!("{}", line);
    }
    Ok(())
}

async fn rescan_file(path: &str) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let mut assets = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let asset: StoredAsset = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid asset record", path, n + 1))?;
        assets.push(asset);
    }

    for outcome in commands::rescan_assets(assets).await.map_err(|e| anyhow!(e))? {
        println!("{}", serde_json::to_string(&outcome)?);
    }
    Ok(())
}

fn print_usage() {
    eprintln!("{} v{}", constants::APP_NAME, constants::APP_VERSION);
    eprintln!("usage: image-risk-core <file|dir>...");
    eprintln!("       image-risk-core rescan <assets.jsonl>");
    eprintln!("       image-risk-core status");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    log::info!("Starting {} v{}", constants::APP_NAME, constants::APP_VERSION);

    let store = Arc::new(ConfigStore::from_default_path().context("loading runtime config")?);
    let _watcher = match store.watch(constants::get_config_path()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log::warn!("Config hot reload disabled: {}", e);
            None
        }
    };

    let engine = commands::init(Arc::clone(&store)).map_err(|e| anyhow!(e))?;

    let outcome = match args[0].as_str() {
        "rescan" => match args.get(1) {
            Some(path) => rescan_file(path).await,
            None => {
                print_usage();
                Ok(())
            }
        },
        "status" => {
            let status = commands::get_engine_status().await.map_err(|e| anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        _ => analyze_paths(&args).await,
    };

    engine.shutdown().await;
    outcome
}
