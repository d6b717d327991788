// HTTP 传输层
//
// 以 multipart/form-data 方式把本地文件 POST 到配置的接口
// 文件以流的方式读取，每发送一块数据汇报一次进度

use crate::config::TransportConfig;
use crate::uploader::task::FileDescriptor;
use crate::uploader::transport::{ProgressReporter, TransportError, UploadTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{multipart, Body, Client};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 基于 reqwest 的上传实现
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("无效的请求头名称: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("无效的请求头值: {}", name))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder().default_headers(headers);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        info!(
            "初始化上传客户端成功: endpoint={}, timeout={:?}s",
            config.endpoint, config.timeout_secs
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn send(
        &self,
        file: &FileDescriptor,
        field_name: &str,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, TransportError> {
        let path = local_path(&file.uri);
        let handle = tokio::fs::File::open(&path).await?;
        let total = handle.metadata().await?.len();

        debug!("开始发送文件: path={:?}, size={}", path, total);

        let chunk_progress = progress.clone();
        let mut sent: u64 = 0;
        let stream = ReaderStream::new(handle).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                if total > 0 {
                    chunk_progress.report(sent as f64 / total as f64);
                }
            }
            chunk
        });

        let mut part = multipart::Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file.name.clone());
        if let Some(mime) = &file.mime_type {
            part = part
                .mime_str(mime)
                .map_err(|e| TransportError::Other(format!("无效的 MIME 类型 {}: {}", mime, e)))?;
        }
        let form = multipart::Form::new().part(field_name.to_string(), part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        debug!("上传响应: file={}, status={}, body={}", file.name, status, body);

        if !status.is_success() {
            warn!("上传接口返回错误: file={}, status={}", file.name, status);
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        progress.report(1.0);
        Ok(parse_body(body))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(
        &self,
        file: &FileDescriptor,
        field_name: &str,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.send(file, field_name, progress) => result,
        }
    }
}

/// 把 uri 转为本地路径（支持 file:// 前缀）
fn local_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// 服务端结果：能解析为 JSON 就用 JSON，否则保留原文
fn parse_body(body: String) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
}
