//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use meshota_core::{Availability, ManifestEntry, ManifestLookup, UpdateSession};
use meshota_vendors::DeviceDefinition;
use serde_json::{Value, json};

use crate::error::CliError;

fn print_json(value: &Value, what: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format {} as JSON: {}", what, e),
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    print_json(&error_json, "error");
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    match error.downcast_ref::<CliError>() {
        Some(CliError::InvalidArgument(_)) => "invalid_argument",
        Some(CliError::NoUpdate(_)) => "no_update",
        Some(CliError::UpdateFailed(_)) => "update_failed",
        Some(CliError::ManifestUnavailable(_)) => "manifest_unavailable",
        Some(CliError::IoError(_)) => "io",
        Some(CliError::JsonError(_)) => "json",
        None => "internal",
    }
}

/// Print the supported device catalog
pub fn print_devices(devices: &[DeviceDefinition], json: bool) {
    if json {
        let devices: Vec<Value> = devices
            .iter()
            .map(|device| {
                json!({
                    "zigbee_models": device.zigbee_models,
                    "model": device.model,
                    "vendor": device.vendor,
                    "description": device.description,
                    "endpoints": device.endpoints,
                    "manifest_url": device.adapter().manifest_url(),
                })
            })
            .collect();
        print_json(
            &json!({
                "success": true,
                "devices": devices
            }),
            "device list",
        );
        return;
    }

    if devices.is_empty() {
        println!("{}", "No supported devices".yellow());
        return;
    }

    println!("{}", "Supported Devices:".bold());
    for device in devices {
        println!(
            "  {} {} {} ({})",
            "●".green(),
            device.vendor.bold(),
            device.model,
            device.zigbee_models.join(", ").dimmed()
        );
        println!("    {}", device.description);
        println!("    Manifest: {}", device.adapter().manifest_url().dimmed());
        if !device.endpoints.is_empty() {
            let endpoints: Vec<String> = device
                .endpoints
                .iter()
                .map(|ep| format!("{}={}", ep.name, ep.id))
                .collect();
            println!("    Endpoints: {}", endpoints.join(", "));
        }
    }
}

/// Print a manifest lookup
pub fn print_manifest(lookup: &ManifestLookup, json: bool) {
    let manifest = &lookup.manifest;
    if json {
        print_json(
            &json!({
                "success": true,
                "source_url": manifest.source_url,
                "fetched_at": manifest.fetched_at,
                "stale": lookup.is_stale(),
                "entries": manifest.entries
            }),
            "manifest",
        );
        return;
    }

    println!("{} {}", "Manifest:".bold(), manifest.source_url);
    println!(
        "  Fetched: {}",
        manifest.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(error) = &lookup.stale {
        println!("  {} {}", "Stale:".yellow().bold(), error);
    }
    if manifest.is_empty() {
        println!("  {}", "No images".yellow());
        return;
    }
    println!("  Images ({}):", manifest.len());
    for entry in &manifest.entries {
        print_entry(entry);
    }
}

fn print_entry(entry: &ManifestEntry) {
    println!(
        "    {} mfr 0x{:04X} type 0x{:04X} version {} ({} bytes)",
        "●".cyan(),
        entry.manufacturer_code,
        entry.image_type,
        entry.file_version,
        entry.file_size
    );
    if let Some(model) = &entry.model_id {
        println!("      Model: {}", model);
    }
    if let Some(name) = &entry.manufacturer_name {
        println!("      Manufacturer: {}", name);
    }
    println!("      URL: {}", entry.url.dimmed());
}

/// Print an availability verdict
pub fn print_availability(device_id: &str, availability: &Availability, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "device_id": device_id,
                "update_available": availability.is_update_available(),
                "availability": availability
            }),
            "availability",
        );
        return;
    }

    match availability {
        Availability::UpdateAvailable(entry) => {
            println!(
                "{} {}: version {} available",
                "✓".green(),
                device_id.bold(),
                entry.file_version
            );
            print_entry(entry);
        }
        Availability::UpToDate => {
            println!("{} {}: up to date", "●".blue(), device_id.bold());
        }
        Availability::NoImage => {
            println!(
                "{} {}: no matching image published",
                "●".yellow(),
                device_id.bold()
            );
        }
    }
}

/// Print a finished update session
pub fn print_session(session: &UpdateSession, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "session": session
            }),
            "session",
        );
        return;
    }

    let version = session
        .candidate
        .as_ref()
        .map(|entry| entry.file_version.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "{} {}: installed version {} ({} bytes)",
        "✓".green(),
        session.device_id.bold(),
        version,
        session.bytes_transferred
    );
    println!("  Session: {}", session.session_id.to_string().dimmed());
    let elapsed = session.updated_at.signed_duration_since(session.started_at);
    println!("  Duration: {} ms", elapsed.num_milliseconds());
}
