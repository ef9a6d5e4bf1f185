//! Writes the storefront OpenAPI document for client generation.
//!
//! Usage: `openapi-export [OUTPUT]`, defaulting to `openapi/storefront-api.v1.json`.

use std::{env, fs, path::PathBuf};

use storefront_api::openapi::ApiDocV1;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi/storefront-api.v1.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let openapi = ApiDocV1::openapi();
    let route_count = openapi.paths.paths.len();
    let json = serde_json::to_string_pretty(&openapi)?;

    if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&output_path, json)?;

    println!(
        "Storefront API v{} document ({} paths) written to {}",
        openapi.info.version,
        route_count,
        output_path.display()
    );
    Ok(())
}
