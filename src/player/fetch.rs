use crate::core::{MediaSource, PlayerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::info;

/// 把媒体源整体取回内存
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &MediaSource) -> Result<Bytes>;
}

/// 读取本地文件；远程地址需要宿主提供自己的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, source: &MediaSource) -> Result<Bytes> {
        match source {
            MediaSource::LocalFile(path) => {
                let data = tokio::fs::read(path).await?;
                info!("📥 已读取 {} ({} 字节)", path.display(), data.len());
                Ok(Bytes::from(data))
            }
            MediaSource::Remote(url) => Err(PlayerError::UnsupportedSource(url.clone())),
        }
    }
}
