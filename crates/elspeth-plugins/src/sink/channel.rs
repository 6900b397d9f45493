// elspeth-plugins/src/sink/channel.rs
// ============================================================================
// Module: Channel Sink
// Description: Sink that forwards written rows into a bounded tokio channel.
// Purpose: Let an in-process consumer (a test, or another task) observe rows
//          as they are committed, without touching a filesystem or network.
// Dependencies: elspeth-core, tokio
// ============================================================================

//! ## Overview
//! [`ChannelSink`] hands each `write` call's rows to a `tokio::sync::mpsc`
//! sender as one batch. It never blocks: a full or closed channel is a
//! non-retryable write failure rather than something the sink waits out.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::hash_canonical_json;
use elspeth_core::interfaces::ArtifactDescriptor;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::Sink;
use tokio::sync::mpsc::Sender;

use crate::sink::SinkBuildError;

// ============================================================================
// SECTION: Channel Sink
// ============================================================================

/// Sink that forwards written rows into a bounded channel.
pub struct ChannelSink {
    sender: Sender<Vec<PipelineRow>>,
    channel_name: String,
    batches_sent: u64,
}

impl ChannelSink {
    /// Creates a channel sink identified by `channel_name` in its artifact
    /// descriptors, sending each write's rows as one batch to `sender`.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, sender: Sender<Vec<PipelineRow>>) -> Self {
        Self { sender, channel_name: channel_name.into(), batches_sent: 0 }
    }
}

impl Sink for ChannelSink {
    fn supports_resume(&self) -> bool {
        false
    }

    fn write(
        &mut self,
        rows: &[PipelineRow],
        _ctx: &dyn PluginContext,
    ) -> Result<ArtifactDescriptor, PluginInvocationError> {
        let batch: Vec<PipelineRow> = rows.to_vec();
        let dicts: Vec<_> = batch.iter().map(PipelineRow::to_dict).collect();
        let digest = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &dicts)
            .map_err(|err| PluginInvocationError::NonRetryable(err.to_string()))?;
        self.sender
            .try_send(batch)
            .map_err(|err| SinkBuildError::ChannelDelivery(err.to_string()))?;
        self.batches_sent += 1;
        Ok(ArtifactDescriptor {
            artifact_type: "channel".to_string(),
            path_or_uri: format!("channel://{}/{}", self.channel_name, self.batches_sent),
            content_hash: digest.value,
            size_bytes: rows.len() as u64,
        })
    }

    fn flush(&mut self) -> Result<(), PluginInvocationError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluginInvocationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use std::collections::BTreeMap;

    use elspeth_core::core::contract::SchemaContract;
    use elspeth_core::core::contract::SchemaMode;

    use super::*;
    use crate::test_support::noop_ctx;

    #[tokio::test]
    async fn delivers_each_write_as_one_batch() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let mut sink = ChannelSink::new("test", tx);
        let ctx = noop_ctx();
        let row = PipelineRow::new(BTreeMap::new(), SchemaContract::new(SchemaMode::Observed));
        let descriptor = sink.write(&[row], &ctx).unwrap();
        assert_eq!(descriptor.size_bytes, 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn reports_delivery_failure_when_the_channel_is_closed() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        drop(rx);
        let mut sink = ChannelSink::new("test", tx);
        let ctx = noop_ctx();
        assert!(sink.write(&[], &ctx).is_err());
    }
}
