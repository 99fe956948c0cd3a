//! Audio upload storage.
//!
//! Uploaded recordings arrive base64-encoded (optionally as a data: URL)
//! and are written under `<uploads.dir>/audio/`. The stored reference is a
//! server-relative URL so rows stay valid if the uploads directory moves.

use anyhow::{bail, Context, Result};
use base64::Engine;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ALLOWED_EXTENSIONS: [&str; 4] = [".m4a", ".mp3", ".wav", ".mp4"];

/// Decode and persist an uploaded recording, returning its `/uploads/...`
/// URL.
pub fn save_uploaded_audio(
    uploads_dir: &Path,
    session_id: &str,
    audio_base64: &str,
    file_name: Option<&str>,
    mime_type: Option<&str>,
) -> Result<String> {
    let encoded = match audio_base64.find("base64,") {
        // data: URL form; keep only the payload.
        Some(idx) if audio_base64.starts_with("data:") => &audio_base64[idx + "base64,".len()..],
        _ => audio_base64,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("Invalid base64 audio payload")?;
    if bytes.is_empty() {
        bail!("Audio payload is empty");
    }

    let extension = pick_extension(file_name, mime_type);
    let name = format!("session_{}_{}{}", session_id, Uuid::new_v4(), extension);

    let audio_dir = uploads_dir.join("audio");
    std::fs::create_dir_all(&audio_dir)
        .with_context(|| format!("Failed to create uploads dir: {}", audio_dir.display()))?;

    let path = audio_dir.join(&name);
    std::fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write audio file: {}", path.display()))?;

    Ok(format!("/uploads/audio/{}", name))
}

/// Map a stored `/uploads/...` URL back to a path under the uploads
/// directory. Anything else (external URLs, absolute paths) resolves to
/// `None` and the caller falls back to offline processing.
pub fn resolve_audio_path(uploads_dir: &Path, file_url: &str) -> Option<PathBuf> {
    let relative = file_url.strip_prefix("/uploads/")?;
    if relative.is_empty() || relative.contains("..") {
        return None;
    }
    Some(uploads_dir.join(relative))
}

fn pick_extension(file_name: Option<&str>, mime_type: Option<&str>) -> &'static str {
    if let Some(name) = file_name {
        let lower = name.to_lowercase();
        for ext in ALLOWED_EXTENSIONS {
            if lower.ends_with(ext) {
                return ext;
            }
        }
    }
    match mime_type {
        Some("audio/wav") => ".wav",
        Some("audio/mpeg") => ".mp3",
        Some("audio/mp4") | Some("audio/x-m4a") => ".m4a",
        _ => ".m4a",
    }
}
