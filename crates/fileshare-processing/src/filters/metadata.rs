use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fileshare_core::ProcessingContext;
use tokio_util::sync::CancellationToken;

use super::order;
use crate::filter::{Filter, StageResult};

/// Extracts extension, sizes, timestamps and category of the local file.
#[derive(Debug, Default)]
pub struct MetadataFilter;

impl MetadataFilter {
    pub fn new() -> Self {
        Self
    }
}

/// Lowercase extension of `file_name` with its leading dot, or `""`.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Broad category for an extension as returned by [`file_extension`].
pub fn file_category(extension: &str) -> &'static str {
    match extension {
        ".pdf" | ".doc" | ".docx" => "document",
        ".xls" | ".xlsx" => "spreadsheet",
        ".ppt" | ".pptx" => "presentation",
        ".txt" | ".md" => "text",
        ".jpg" | ".jpeg" | ".png" | ".gif" | ".bmp" | ".webp" => "image",
        ".mp4" | ".avi" | ".mov" | ".mkv" => "video",
        ".mp3" | ".wav" | ".flac" | ".ogg" => "audio",
        ".zip" | ".rar" | ".7z" | ".tar" | ".gz" => "archive",
        ".json" | ".xml" | ".yaml" | ".yml" => "data",
        ".cs" | ".java" | ".py" | ".js" | ".ts" | ".rs" => "code",
        _ => "other",
    }
}

fn rfc3339(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl Filter for MetadataFilter {
    fn name(&self) -> &'static str {
        "Metadata"
    }

    fn order(&self) -> u32 {
        order::METADATA
    }

    async fn process(&self, mut ctx: ProcessingContext, _cancel: &CancellationToken) -> StageResult {
        let info = match tokio::fs::metadata(&ctx.local_path).await {
            Ok(info) => info,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.add_error(format!("File not found: {}", ctx.local_path.display()));
                return Ok(ctx);
            }
            Err(e) => {
                ctx.add_error(format!("Metadata extraction failed: {}", e));
                return Ok(ctx);
            }
        };

        let extension = file_extension(&ctx.file_name);
        let category = file_category(&extension);
        let modified = info.modified().ok();
        let created = info.created().ok().or(modified);

        ctx.insert_metadata("extension", extension.clone());
        ctx.insert_metadata("originalSize", ctx.declared_size);
        ctx.insert_metadata("currentSize", info.len());
        if let Some(created) = created {
            ctx.insert_metadata("createdAt", rfc3339(created));
        }
        if let Some(modified) = modified {
            ctx.insert_metadata("lastModified", rfc3339(modified));
        }
        ctx.insert_metadata("fileCategory", category);
        let mime_type = ctx.content_type.clone();
        ctx.insert_metadata("mimeType", mime_type);

        tracing::info!(
            file_id = %ctx.file_id,
            extension = %extension,
            category = category,
            size = info.len(),
            properties = ctx.metadata.len(),
            "Metadata extracted"
        );

        Ok(ctx)
    }
}
