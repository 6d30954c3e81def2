// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations

use console::style;
use futures::StreamExt;
use keel_core::{
    stream, DeleteOptions, LogicalPath, StorageBackend, StorageError, StorageResult,
    StorageService,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

type Backend = Arc<dyn StorageBackend>;

fn parse_path(path: &str) -> StorageResult<LogicalPath> {
    LogicalPath::new(path)
}

/// Split a `path=name` zip entry; without `=` the entry keeps its path.
fn parse_entry(entry: &str) -> StorageResult<(LogicalPath, String)> {
    match entry.split_once('=') {
        Some((path, name)) if !name.is_empty() => Ok((parse_path(path)?, name.to_string())),
        Some(_) => Err(StorageError::InvalidPath(format!("{entry}: empty entry name"))),
        None => {
            let path = parse_path(entry)?;
            let name = path.as_str().to_string();
            Ok((path, name))
        }
    }
}

pub async fn mkdir(backend: &Backend, paths: &[String]) -> StorageResult<()> {
    for path in paths {
        backend.mkdir(&parse_path(path)?).await?;
        println!("Created {}", path);
    }
    Ok(())
}

/// List directory contents, sorted by name
pub async fn ls(backend: &Backend, path: &str, long: bool) -> StorageResult<()> {
    let dir = parse_path(path)?;
    let mut names = backend.readdir(&dir).await?;
    names.sort();

    if names.is_empty() {
        println!("(empty directory)");
        return Ok(());
    }

    for name in names {
        if long {
            let child = dir.join(&name)?;
            if backend.check_file_exists(&child).await {
                println!("-  {name}");
            } else {
                println!("{}  {}", style("d").cyan(), style(name).cyan());
            }
        } else {
            println!("{name}");
        }
    }
    Ok(())
}

pub async fn rm(backend: &Backend, paths: &[String]) -> StorageResult<()> {
    for path in paths {
        backend.unlink(&parse_path(path)?).await?;
        println!("Removed {}", path);
    }
    Ok(())
}

pub async fn rmdir(backend: &Backend, path: &str, recursive: bool, force: bool) -> StorageResult<()> {
    let options = DeleteOptions { recursive, force };
    backend.unlink_dir(&parse_path(path)?, &options).await?;
    println!("Removed {}", path);
    Ok(())
}

pub async fn mv(backend: &Backend, source: &str, dest: &str) -> StorageResult<()> {
    backend
        .move_file(&parse_path(source)?, &parse_path(dest)?)
        .await?;
    if !backend.capabilities().atomic_move {
        debug!("move on {} is a copy followed by a delete", backend.id());
    }
    println!("Moved {} -> {}", source, dest);
    Ok(())
}

pub async fn exists(backend: &Backend, path: &str) -> StorageResult<()> {
    let file = parse_path(path)?;
    if backend.check_file_exists(&file).await {
        println!("{}", style("exists").green());
        Ok(())
    } else {
        println!("{}", style("missing").yellow());
        Err(StorageError::NotFound(path.to_string()))
    }
}

/// Copy file contents to stdout
pub async fn cat(backend: &Backend, path: &str) -> StorageResult<()> {
    let mut handle = backend.create_read_stream(&parse_path(path)?, None).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = handle.stream.next().await {
        stdout.write_all(&chunk?)?;
    }
    stdout.flush()?;
    Ok(())
}

pub async fn put(backend: &Backend, file: &Path, dest: &str) -> StorageResult<()> {
    let dest = parse_path(dest)?;
    let source = tokio::fs::File::open(file)
        .await
        .map_err(|e| StorageError::from_io(e, file.display()))?;

    let written = backend.write_file(&dest, stream::from_reader(source)).await?;
    println!("Stored {} ({})", dest, bytesize::ByteSize(written));
    Ok(())
}

/// Build a zip archive in a local file.
///
/// The archive output is written by its own task while entries are queued, since
/// the session only makes progress while its output is drained.
pub async fn zip(backend: Backend, output: &Path, entries: &[String]) -> StorageResult<()> {
    let entries = entries
        .iter()
        .map(|entry| parse_entry(entry))
        .collect::<StorageResult<Vec<_>>>()?;

    let mut file = tokio::fs::File::create(output)
        .await
        .map_err(|e| StorageError::from_io(e, output.display()))?;

    let session = backend.create_zip_stream()?;
    let mut archive = session.stream()?;
    let writer = tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(chunk) = archive.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        StorageResult::Ok(written)
    });

    let count = entries.len();
    for (source, name) in entries {
        debug!(source = %source, entry = %name, "queueing zip entry");
        session.add_file(source, name)?;
    }
    let finalized = session.finalize().await;

    let written = writer
        .await
        .map_err(|e| StorageError::Archive(format!("archive writer failed: {e}")))?;
    let written = match finalized.and(written) {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(output).await;
            return Err(e);
        }
    };

    println!(
        "Wrote {} ({} entries, {})",
        output.display(),
        count,
        bytesize::ByteSize(written)
    );
    Ok(())
}

pub async fn prune(backend: &Backend, root: &str) -> StorageResult<()> {
    backend.remove_empty_dirs(&parse_path(root)?).await?;
    println!("Pruned empty directories below {}", root);
    Ok(())
}

/// Show storage space information
pub async fn df(backend: &Backend, path: &str) -> StorageResult<()> {
    let usage = backend.check_disk_usage(&parse_path(path)?).await?;

    println!("Storage: {} ({})", backend.id(), backend.display_name());
    if !backend.capabilities().disk_usage {
        println!("  {}", style("capacity is nominal for this backend").dim());
    }
    let used = usage.total.saturating_sub(usage.free);
    let pct = if usage.total > 0 {
        (used as f64 / usage.total as f64) * 100.0
    } else {
        0.0
    };
    println!("  Total:     {}", bytesize::ByteSize(usage.total));
    println!("  Used:      {} ({:.1}%)", bytesize::ByteSize(used), pct);
    println!("  Available: {}", bytesize::ByteSize(usage.available));
    Ok(())
}

pub async fn init(backend: Backend, base: &str) -> StorageResult<()> {
    let service = StorageService::new(backend, parse_path(base)?);
    service.init().await?;
    println!("Initialized {}", base);
    Ok(())
}

/// Best-effort batch delete; reports every path that could not be removed
pub async fn purge(backend: Backend, paths: &[String]) -> StorageResult<()> {
    let service = StorageService::new(backend, parse_path("library")?);
    let summary = service.delete_files(paths).await;

    println!("Removed {} file(s)", summary.deleted);
    if summary.failed.is_empty() {
        return Ok(());
    }
    for path in &summary.failed {
        println!("  {} {}", style("failed").yellow(), path);
    }
    Err(StorageError::PartialFailure { failed: summary.failed })
}
