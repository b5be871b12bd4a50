//! BlobStore: object payloads on local disk under `base_path/{bucket}/{name}`.
//!
//! Writes go to a temporary file next to the destination, are fsynced, and
//! are then renamed into place, so a reader never sees a half-written object.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Size and MD5 of a payload that was just written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlob {
    pub size_bytes: i64,
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding every payload of one bucket.
    pub fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    pub fn object_path(&self, bucket: &str, physical_name: &str) -> PathBuf {
        self.bucket_root(bucket).join(physical_name)
    }

    pub async fn ensure_bucket_dir(&self, bucket: &str) -> io::Result<()> {
        fs::create_dir_all(self.bucket_root(bucket)).await
    }

    /// Remove a bucket directory. A missing directory is not an error.
    pub async fn remove_bucket_dir(&self, bucket: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.bucket_root(bucket)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Stream a payload to disk, computing size and MD5 along the way.
    pub async fn write_stream<S>(
        &self,
        bucket: &str,
        physical_name: &str,
        stream: S,
    ) -> io::Result<WrittenBlob>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let file_path = self.object_path(bucket, physical_name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(err);
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        drop(file);

        self.commit_tmp(&tmp_path, &file_path).await?;

        Ok(WrittenBlob {
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Write a whole payload held in memory.
    pub async fn write(&self, bucket: &str, physical_name: &str, data: Bytes) -> io::Result<WrittenBlob> {
        self.write_stream(bucket, physical_name, futures::stream::once(async { Ok(data) }))
            .await
    }

    pub async fn read(&self, bucket: &str, physical_name: &str) -> io::Result<Bytes> {
        let bytes = fs::read(self.object_path(bucket, physical_name)).await?;
        Ok(Bytes::from(bytes))
    }

    /// Open a payload for streaming out.
    pub async fn open(&self, bucket: &str, physical_name: &str) -> io::Result<File> {
        File::open(self.object_path(bucket, physical_name)).await
    }

    pub async fn exists(&self, bucket: &str, physical_name: &str) -> io::Result<bool> {
        fs::try_exists(self.object_path(bucket, physical_name)).await
    }

    /// Delete a payload. Returns `false` if it was already gone.
    pub async fn delete(&self, bucket: &str, physical_name: &str) -> io::Result<bool> {
        let file_path = self.object_path(bucket, physical_name);
        match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed physical file {}", file_path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn commit_tmp(&self, tmp_path: &Path, file_path: &Path) -> io::Result<()> {
        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(err);
            }
        }
        Ok(())
    }
}
