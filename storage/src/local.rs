use camino::{Utf8Path, Utf8PathBuf};
use eyre::Context;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{
    validate_bucket, validate_location, Driver, Metadata, Reader, StorageError, StorageErrorKind,
    Writer,
};

const TEMP_SUFFIX: &str = ".tmp";

/// Storage driver which keeps each bucket in a directory below `root`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. The directory is created on first write.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        validate_location(self.name(), bucket, remote)?;
        let mut path = self.root.join(bucket);
        path.push(remote);
        Ok(path)
    }

    fn io_error(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        context: &'static str,
    ) -> impl FnOnce(std::io::Error) -> StorageError {
        let engine = self.name();
        let bucket = bucket.to_owned();
        let remote = remote.to_string();
        move |err| {
            StorageError::io(engine, err)
                .bucket(bucket)
                .path(remote)
                .context(context)
                .build()
        }
    }

    async fn create_parent(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.io_error(bucket, path, "create_dir_all"))?;
        }
        Ok(())
    }

    async fn write_to(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
        file: tokio::fs::File,
    ) -> Result<(), StorageError> {
        let mut writer = tokio::io::BufWriter::new(file);

        tokio::io::copy_buf(reader, &mut writer)
            .await
            .map_err(self.io_error(bucket, remote, "copy"))?;

        writer
            .shutdown()
            .await
            .map_err(self.io_error(bucket, remote, "shutdown writer"))?;

        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(self.io_error(bucket, remote, "sync"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(self.io_error(bucket, remote, "metadata"))?;
        if !metadata.is_file() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("not a file: {path}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(self.io_error(bucket, remote, "created timestamp"))?
                .into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(path)
            .await
            .map_err(self.io_error(bucket, remote, "remove_file"))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        self.create_parent(bucket, &path).await?;

        // Write beside the target and rename over it, so readers never see a partial object.
        let name = path.file_name().unwrap_or(remote.as_str());
        let staging = path.with_file_name(format!(
            ".{name}.{}{TEMP_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        ));

        let file = tokio::fs::File::create(&staging)
            .await
            .map_err(self.io_error(bucket, remote, "create staging file"))?;

        let written = match self.write_to(bucket, remote, local, file).await {
            Ok(()) => tokio::fs::rename(&staging, &path)
                .await
                .map_err(self.io_error(bucket, remote, "rename staging file")),
            Err(err) => Err(err),
        };

        if written.is_err() {
            if let Err(err) = tokio::fs::remove_file(&staging).await {
                tracing::warn!(%staging, "Unable to remove staging file: {err}");
            }
        }
        written
    }

    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        self.create_parent(bucket, &path).await?;

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(self.io_error(bucket, remote, "create file"))?;

        self.write_to(bucket, remote, local, file).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(self.io_error(bucket, remote, "open file"))?,
        );

        tokio::io::copy_buf(&mut reader, local)
            .await
            .map_err(self.io_error(bucket, remote, "copy"))?;

        local
            .flush()
            .await
            .map_err(self.io_error(bucket, remote, "flush writer"))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        validate_bucket(self.name(), bucket)?;

        let path = self.root.join(bucket);
        let items = tokio::task::spawn_blocking(move || collect_list(&path))
            .in_current_span()
            .await
            .wrap_err("local driver")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Other, err))?
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))?;

        tracing::debug!("Found {} entries", items.len());

        Ok(items
            .into_iter()
            .filter(|key| prefix.map_or(true, |prefix| key.as_str().starts_with(prefix.as_str())))
            .map(|key| key.into_string())
            .collect())
    }
}

#[tracing::instrument]
fn collect_list(path: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    if !path.is_dir() {
        return Ok(files);
    }

    visit(path, &mut files).wrap_err_with(|| format!("walking {path}"))?;

    Ok(files
        .into_iter()
        .filter_map(|p| p.strip_prefix(path).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else if !is_staging(entry.file_name()) {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

fn is_staging(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}
