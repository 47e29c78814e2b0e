//! Internal job handlers
//!
//! Everything that does not shell out to the transfer engine runs here:
//! prefix deletion, copy/move in all shapes, ZIP artifacts, index builds,
//! and the staging-upload fallback when no engine binary is configured.

use crate::payload::{
    parse, CopyBatchPayload, CopyObjectPayload, CopyPrefixPayload, DeletePrefixPayload,
    IndexPayload, StagingSyncPayload, ZipPayload,
};
use crate::JobContext;
use futures::StreamExt;
use objectdeck_common::{Error, ObjectEntry, Progress, Result};
use objectdeck_providers::{ListObjectsRequest, ObjectStore};
use objectdeck_store::INDEX_BATCH_MAX;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

const LIST_PAGE_SIZE: u32 = 1000;

fn canceled() -> Error {
    Error::conflict("job canceled")
}

fn check_cancel(ctx: &JobContext) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        Err(canceled())
    } else {
        Ok(())
    }
}

async fn report(ctx: &JobContext, progress: Progress) {
    let _ = ctx.progress.try_send(progress);
}

/// Enumerate every object under a prefix, page by page.
async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    ctx: &JobContext,
) -> Result<Vec<ObjectEntry>> {
    let mut out = Vec::new();
    let mut cursor = None;
    loop {
        check_cancel(ctx)?;
        let page = store
            .list_objects(&ListObjectsRequest {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                delimiter: None,
                cursor,
                limit: Some(LIST_PAGE_SIZE),
            })
            .await?;
        out.extend(page.objects);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(out),
        }
    }
}

pub(crate) async fn delete_prefix(ctx: &JobContext, payload: &Value) -> Result<()> {
    let payload: DeletePrefixPayload = parse(payload)?;
    let provider = ctx.provider()?;
    let prefix = if payload.delete_all { "" } else { payload.prefix.as_str() };

    let objects = list_all(provider.as_ref(), &payload.bucket, prefix, ctx).await?;
    let total = objects.len() as u64;
    let mut done = 0u64;
    for chunk in objects.chunks(500) {
        check_cancel(ctx)?;
        let keys: Vec<String> = chunk.iter().map(|o| o.key.clone()).collect();
        provider.delete_objects(&payload.bucket, &keys).await?;
        done += keys.len() as u64;
        report(
            ctx,
            Progress {
                objects_done: done,
                objects_total: Some(total),
                ..Progress::default()
            },
        )
        .await;
    }
    Ok(())
}

async fn copy_one(
    provider: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    dest_bucket: &str,
    dest_key: &str,
) -> Result<u64> {
    let body = provider.get_object(bucket, key, None).await?;
    let len = body.content_length;
    provider
        .put_object_stream(
            dest_bucket,
            dest_key,
            reqwest::Body::wrap_stream(body.stream),
            len,
            body.content_type.as_deref(),
        )
        .await?;
    Ok(len.unwrap_or(0))
}

pub(crate) async fn copy_or_move_object(ctx: &JobContext, payload: &Value, delete_source: bool) -> Result<()> {
    let payload: CopyObjectPayload = parse(payload)?;
    let provider = ctx.provider()?;
    let bytes = copy_one(
        provider.as_ref(),
        &payload.bucket,
        &payload.key,
        &payload.dest_bucket,
        &payload.dest_key,
    )
    .await?;
    if delete_source {
        provider
            .delete_objects(&payload.bucket, &[payload.key.clone()])
            .await?;
    }
    report(
        ctx,
        Progress {
            objects_done: 1,
            objects_total: Some(1),
            bytes_done: bytes,
            ..Progress::default()
        },
    )
    .await;
    Ok(())
}

pub(crate) async fn copy_or_move_batch(ctx: &JobContext, payload: &Value, delete_source: bool) -> Result<()> {
    let payload: CopyBatchPayload = parse(payload)?;
    let provider = ctx.provider()?;
    let total = payload.items.len() as u64;
    let mut done = 0u64;
    let mut bytes = 0u64;
    let mut moved: Vec<String> = Vec::new();
    for item in &payload.items {
        check_cancel(ctx)?;
        bytes += copy_one(
            provider.as_ref(),
            &payload.bucket,
            &item.key,
            &payload.dest_bucket,
            &item.dest_key,
        )
        .await?;
        moved.push(item.key.clone());
        done += 1;
        report(
            ctx,
            Progress {
                objects_done: done,
                objects_total: Some(total),
                bytes_done: bytes,
                ..Progress::default()
            },
        )
        .await;
    }
    if delete_source {
        provider.delete_objects(&payload.bucket, &moved).await?;
    }
    Ok(())
}

pub(crate) async fn copy_or_move_prefix(ctx: &JobContext, payload: &Value, delete_source: bool) -> Result<()> {
    let payload: CopyPrefixPayload = parse(payload)?;
    let provider = ctx.provider()?;
    let objects = list_all(provider.as_ref(), &payload.bucket, &payload.prefix, ctx).await?;
    let total = objects.len() as u64;
    let mut done = 0u64;
    let mut bytes = 0u64;
    for object in &objects {
        check_cancel(ctx)?;
        let suffix = object.key.strip_prefix(&payload.prefix).unwrap_or(&object.key);
        let dest_key = format!("{}{suffix}", payload.dest_prefix);
        bytes += copy_one(
            provider.as_ref(),
            &payload.bucket,
            &object.key,
            &payload.dest_bucket,
            &dest_key,
        )
        .await?;
        done += 1;
        report(
            ctx,
            Progress {
                objects_done: done,
                objects_total: Some(total),
                bytes_done: bytes,
                ..Progress::default()
            },
        )
        .await;
    }
    if delete_source {
        let keys: Vec<String> = objects.iter().map(|o| o.key.clone()).collect();
        for chunk in keys.chunks(500) {
            provider.delete_objects(&payload.bucket, chunk).await?;
        }
    }
    Ok(())
}

pub(crate) async fn zip_objects(ctx: &JobContext, payload: &Value) -> Result<()> {
    let payload: ZipPayload = parse(payload)?;
    let provider = ctx.provider()?;

    let entries: Vec<ObjectEntry> = match (&payload.prefix, &payload.keys) {
        (Some(prefix), _) => list_all(provider.as_ref(), &payload.bucket, prefix, ctx).await?,
        (None, Some(keys)) => {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                out.push(provider.head_object(&payload.bucket, key).await?);
            }
            out
        }
        (None, None) => return Err(Error::invalid_argument("zip payload has neither prefix nor keys")),
    };

    // Stage each object to disk, then build the archive in one blocking
    // pass; the artifact is uploaded back to the bucket at destKey.
    let staging = tempfile::tempdir().map_err(|e| Error::internal(format!("zip staging dir: {e}")))?;
    let total = entries.len() as u64;
    let mut done = 0u64;
    let mut bytes = 0u64;
    let mut staged: Vec<(String, PathBuf)> = Vec::new();
    for entry in &entries {
        check_cancel(ctx)?;
        let local = staging.path().join(format!("{done:08}"));
        bytes += download_to_file(provider.as_ref(), &payload.bucket, &entry.key, &local).await?;
        let archive_name = match &payload.prefix {
            Some(prefix) => entry.key.strip_prefix(prefix).unwrap_or(&entry.key).to_string(),
            None => entry.key.clone(),
        };
        staged.push((archive_name, local));
        done += 1;
        report(
            ctx,
            Progress {
                objects_done: done,
                objects_total: Some(total),
                bytes_done: bytes,
                ..Progress::default()
            },
        )
        .await;
    }

    let archive_path = staging.path().join("artifact.zip");
    let archive_for_task = archive_path.clone();
    tokio::task::spawn_blocking(move || build_archive(&archive_for_task, &staged))
        .await
        .map_err(|e| Error::internal(format!("zip task: {e}")))??;

    check_cancel(ctx)?;
    let file = tokio::fs::File::open(&archive_path)
        .await
        .map_err(|e| Error::internal(format!("open archive: {e}")))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| Error::internal(format!("stat archive: {e}")))?
        .len();
    let stream = tokio_util::io::ReaderStream::new(file);
    provider
        .put_object_stream(
            &payload.bucket,
            &payload.dest_key,
            reqwest::Body::wrap_stream(stream),
            Some(len),
            Some("application/zip"),
        )
        .await?;
    Ok(())
}

fn build_archive(archive_path: &Path, staged: &[(String, PathBuf)]) -> Result<()> {
    let file = std::fs::File::create(archive_path)
        .map_err(|e| Error::internal(format!("create archive: {e}")))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, path) in staged {
        writer
            .start_file(name, options)
            .map_err(|e| Error::internal(format!("zip entry {name}: {e}")))?;
        let data = std::fs::read(path).map_err(|e| Error::internal(format!("read staged file: {e}")))?;
        writer
            .write_all(&data)
            .map_err(|e| Error::internal(format!("zip entry {name}: {e}")))?;
    }
    writer
        .finish()
        .map_err(|e| Error::internal(format!("finish archive: {e}")))?;
    Ok(())
}

async fn download_to_file(
    provider: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    dest: &Path,
) -> Result<u64> {
    use tokio::io::AsyncWriteExt;
    let mut body = provider.get_object(bucket, key, None).await?;
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::internal(format!("create staged file: {e}")))?;
    let mut written = 0u64;
    while let Some(chunk) = body.stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::internal(format!("write staged file: {e}")))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| Error::internal(format!("flush staged file: {e}")))?;
    Ok(written)
}

pub(crate) async fn index_objects(ctx: &JobContext, payload: &Value) -> Result<()> {
    let payload: IndexPayload = parse(payload)?;
    let provider = ctx.provider()?;
    if payload.full {
        ctx.store.clear_object_index(ctx.profile.id, &payload.bucket)?;
    }

    let mut cursor = None;
    let mut done = 0u64;
    loop {
        check_cancel(ctx)?;
        let page = provider
            .list_objects(&ListObjectsRequest {
                bucket: payload.bucket.clone(),
                prefix: payload.prefix.clone(),
                delimiter: None,
                cursor,
                limit: Some(INDEX_BATCH_MAX as u32),
            })
            .await?;
        for chunk in page.objects.chunks(INDEX_BATCH_MAX) {
            ctx.store
                .upsert_object_index_batch(ctx.profile.id, &payload.bucket, chunk)?;
        }
        done += page.objects.len() as u64;
        report(
            ctx,
            Progress {
                objects_done: done,
                ..Progress::default()
            },
        )
        .await;
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    ctx.store.finalize_object_index(ctx.profile.id, &payload.bucket)?;
    Ok(())
}

/// Upload a staging directory's files under the session prefix. Used when
/// no transfer engine binary is configured; cleanup runs separately.
pub(crate) async fn staging_upload(ctx: &JobContext, payload: &StagingSyncPayload) -> Result<()> {
    let provider = ctx.provider()?;
    if !payload.staging_dir.is_dir() {
        return Err(Error::not_found(format!(
            "staging directory {} no longer exists",
            payload.staging_dir.display()
        )));
    }

    let files = collect_staged_files(&payload.staging_dir)?;
    let total = files.len() as u64;
    let mut done = 0u64;
    let mut bytes = 0u64;
    for (rel, path) in &files {
        check_cancel(ctx)?;
        let key = format!("{}{rel}", payload.prefix);
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::internal(format!("open staged file: {e}")))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::internal(format!("stat staged file: {e}")))?
            .len();
        let stream = tokio_util::io::ReaderStream::new(file);
        provider
            .put_object_stream(
                &payload.bucket,
                &key,
                reqwest::Body::wrap_stream(stream),
                Some(len),
                None,
            )
            .await?;
        done += 1;
        bytes += len;
        report(
            ctx,
            Progress {
                objects_done: done,
                objects_total: Some(total),
                bytes_done: bytes,
                ..Progress::default()
            },
        )
        .await;
    }
    Ok(())
}

/// Post-success cleanup for a staging sync: multipart records, session row,
/// then the staging directory last.
pub(crate) async fn cleanup_staging(
    store: &objectdeck_store::Store,
    payload: &StagingSyncPayload,
) -> Result<()> {
    store.delete_multipart_records_for_session(payload.session_id)?;
    store.delete_upload_session(payload.session_id)?;
    tokio::fs::remove_dir_all(&payload.staging_dir)
        .await
        .map_err(|e| Error::internal(format!("remove staging dir: {e}")))?;
    Ok(())
}

/// Staged files as `(object-relative path, filesystem path)`. Filenames
/// encode their relative path with `%2F` separators.
fn collect_staged_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::internal(format!("read staging dir: {e}")))? {
        let entry = entry.map_err(|e| Error::internal(format!("read staging dir: {e}")))?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = name.replace("%2F", "/");
        out.push((rel, entry.path()));
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_staged_files_decodes_relpath() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), b"hello").unwrap();
        std::fs::write(tmp.path().join("docs%2Freadme.md"), b"hi").unwrap();
        let files = collect_staged_files(tmp.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|(rel, _)| rel.as_str()).collect();
        assert_eq!(names, vec!["docs/readme.md", "hello.txt"]);
    }

    #[test]
    fn test_build_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        std::fs::write(&a, b"alpha").unwrap();
        let archive = tmp.path().join("out.zip");
        build_archive(&archive, &[("dir/a.txt".to_string(), a)]).unwrap();

        let file = std::fs::File::open(&archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.len(), 1);
        let entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), "dir/a.txt");
    }
}
