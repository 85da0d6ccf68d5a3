use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, error};
use crate::{
    domain::{
        error::IngestionError,
        models::{LocalFile, ReportReference},
        ports::FileFetcher,
    },
    infrastructure::scratch::ScratchDir,
};

pub struct HttpFileFetcher {
    client: Client,
    files_base_url: String,
    scratch: ScratchDir,
}

impl HttpFileFetcher {
    pub fn new(client: Client, files_base_url: String, scratch: ScratchDir) -> Self {
        Self { client, files_base_url, scratch }
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, reference: &ReportReference) -> Result<LocalFile, IngestionError> {
        let url = format!("{}{}", self.files_base_url, reference.path());
        let path = self.scratch.path_for(reference.report_date());
        debug!("Downloading {} to {}", url, path.display());

        let response = self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Download request failed for {}: {}", url, e);
                IngestionError::Download(e.to_string())
            })?;

        self.scratch.ensure().await?;
        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                error!("Download of {} interrupted after {} bytes: {}", url, written, e);
                IngestionError::Download(e.to_string())
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        info!("Downloaded {} ({} bytes)", path.display(), written);
        Ok(LocalFile {
            path,
            report_date: reference.report_date(),
        })
    }
}
