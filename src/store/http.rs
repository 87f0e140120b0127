// HTTP 对象存储
//
// 以 `PUT {base_url}/{目录}/{对象名}` 上传对象，请求体为流式分块：
// 每块被 HTTP 客户端取走时上报一次进度。
// 响应体若为 JSON 且带 `location` 字段则作为定位信息，否则使用对象 URL

use super::{ProgressReporter, RemoteObjectStore, RemotePath, TransferError, UploadSnapshot};
use crate::config::StoreConfig;
use crate::uploader::UploadSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Body, Client};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 流式请求体的块大小（64KB）
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// 上传响应（可选字段）
#[derive(Debug, Deserialize)]
struct PutResponse {
    location: Option<String>,
}

/// HTTP 对象存储
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("对象存储地址必须以 http:// 或 https:// 开头: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "初始化 HTTP 对象存储: {}, 认证={}",
            base_url,
            if auth_token.is_some() { "已设置" } else { "未设置" }
        );

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// 从存储配置创建
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("HTTP 存储需要配置 base_url")?;
        Self::new(
            base_url,
            config.auth_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// 对象 URL，每段单独做 URL 编码
    pub fn object_url(&self, destination: &RemotePath) -> String {
        let encoded: Vec<String> = destination
            .segments()
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }

    /// 构建带进度上报的请求体，返回 (总大小, 请求体)
    async fn build_body(
        source: UploadSource,
        progress: ProgressReporter,
    ) -> Result<(u64, Body), TransferError> {
        match source {
            UploadSource::Bytes(data) => {
                let total = data.len() as u64;
                let chunks: Vec<Vec<u8>> =
                    data.chunks(BODY_CHUNK_SIZE).map(|c| c.to_vec()).collect();
                let mut sent = 0u64;
                let stream = futures::stream::iter(chunks).map(move |chunk| {
                    sent += chunk.len() as u64;
                    progress.report(sent, total);
                    Ok::<_, std::io::Error>(chunk)
                });
                Ok((total, Body::wrap_stream(stream)))
            }
            UploadSource::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let total = file.metadata().await?.len();
                let mut sent = 0u64;
                let stream = ReaderStream::with_capacity(file, BODY_CHUNK_SIZE).map(move |chunk| {
                    if let Ok(bytes) = &chunk {
                        sent += bytes.len() as u64;
                        progress.report(sent, total);
                    }
                    chunk
                });
                Ok((total, Body::wrap_stream(stream)))
            }
        }
    }
}

#[async_trait]
impl RemoteObjectStore for HttpStore {
    async fn upload(
        &self,
        source: UploadSource,
        destination: &RemotePath,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<UploadSnapshot, TransferError> {
        let url = self.object_url(destination);
        progress.report(0, source.len_hint().unwrap_or(0));

        let (total, body) = Self::build_body(source, progress).await?;

        let mut request = self
            .client
            .put(&url)
            .header(header::CONTENT_LENGTH, total)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        debug!("PUT {} ({} bytes)", url, total);

        // 取消时直接丢弃请求 future，连接随之关闭；读取响应体期间同样响应取消
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = request.send() => result.map_err(|e| TransferError::Network(e.to_string()))?,
        };

        let status = response.status();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = response.text() => result.map_err(|e| TransferError::Network(e.to_string()))?,
        };

        if !status.is_success() {
            return Err(TransferError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let location = serde_json::from_str::<PutResponse>(&text)
            .ok()
            .and_then(|r| r.location)
            .unwrap_or(url);

        Ok(UploadSnapshot {
            remote_path: destination.to_string(),
            size: total,
            location,
            completed_at: chrono::Utc::now().timestamp(),
        })
    }
}
