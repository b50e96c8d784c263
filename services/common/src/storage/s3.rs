//! S3-backed cold archive for hourly candle objects

use super::{blob_key, BlobStore, CandleRow};
use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

/// Writes one JSON object per `(symbol, hour)` under
/// `candles/<interval>/<symbol>/<YYYYMMDDHH>.json`.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build against the given region and bucket
    pub async fn connect(region: &str, bucket: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        debug!(region, bucket, "blob store connected");
        Self {
            client: Client::new(&config),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_candles(
        &self,
        symbol: &str,
        interval: &str,
        hour_key: &str,
        candles: &[CandleRow],
    ) -> EngineResult<()> {
        let key = blob_key(symbol, interval, hour_key);
        let body = serde_json::to_vec(candles)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;
        debug!(%key, count = candles.len(), "hourly archive written");
        Ok(())
    }
}
