//! Line-oriented operator input.
//!
//! Each line is one JSON object. Draw events (`created`, `edited`,
//! `deleted`, `retry`) are forwarded to the annotation pipeline;
//! `open_preview` / `close_preview` drive the preview overlay:
//!
//! ```text
//! {"type":"created","kind":"point","coordinates":[[50.2156,22.5311]],"comment":"ford"}
//! {"type":"open_preview","marker":"target:11"}
//! {"type":"close_preview"}
//! ```

use std::sync::Arc;

use serde::Deserialize;
use tacmap_core::resolver::Resolver;
use tacmap_sync::events::{parse_event, DrawEvent};
use tacmap_sync::preview::PreviewOverlay;
use tacmap_sync::render::MarkerLayer;
use tacmap_sync::store::ReconciliationStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Envelope used to route a line before full parsing.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PreviewCommand {
    OpenPreview { marker: String },
    ClosePreview,
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    Draw(DrawEvent),
    OpenPreview { marker: String },
    ClosePreview,
}

impl From<PreviewCommand> for FeedCommand {
    fn from(cmd: PreviewCommand) -> Self {
        match cmd {
            PreviewCommand::OpenPreview { marker } => Self::OpenPreview { marker },
            PreviewCommand::ClosePreview => Self::ClosePreview,
        }
    }
}

pub fn parse_line(line: &str) -> Result<FeedCommand, FeedError> {
    let envelope: Envelope = serde_json::from_str(line)?;
    match envelope.kind.as_str() {
        "open_preview" | "close_preview" => {
            Ok(serde_json::from_str::<PreviewCommand>(line)?.into())
        }
        _ => Ok(FeedCommand::Draw(parse_event(line)?)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Malformed input line: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No marker with key {0}")]
    UnknownMarker(String),

    #[error("Marker {0} has no preview media")]
    NoPreview(String),

    #[error("Annotation pipeline is no longer accepting events")]
    PipelineClosed,
}

/// Routes operator input to the pipeline and the preview overlay.
pub struct DrawFeed {
    events: mpsc::Sender<DrawEvent>,
    preview: Arc<PreviewOverlay>,
    store: Arc<ReconciliationStore>,
    resolver: Arc<Resolver>,
}

impl DrawFeed {
    pub fn new(
        events: mpsc::Sender<DrawEvent>,
        preview: Arc<PreviewOverlay>,
        store: Arc<ReconciliationStore>,
        resolver: Arc<Resolver>,
    ) -> Self {
        Self {
            events,
            preview,
            store,
            resolver,
        }
    }

    /// Parse and dispatch a single line.
    pub async fn handle_line(&self, line: &str) -> Result<(), FeedError> {
        match parse_line(line)? {
            FeedCommand::Draw(event) => {
                tracing::debug!(event = event.name(), "Forwarding draw event");
                self.events
                    .send(event)
                    .await
                    .map_err(|_| FeedError::PipelineClosed)
            }
            FeedCommand::OpenPreview { marker } => {
                let layer = MarkerLayer::build(&self.store, &self.resolver);
                let found = layer
                    .find(&marker)
                    .ok_or_else(|| FeedError::UnknownMarker(marker.clone()))?;
                let media = found
                    .popup
                    .preview
                    .clone()
                    .ok_or(FeedError::NoPreview(marker))?;
                self.preview.open(media);
                Ok(())
            }
            FeedCommand::ClosePreview => {
                self.preview.close();
                Ok(())
            }
        }
    }

    /// Read lines until end of input or cancellation.
    ///
    /// Bad lines are logged and skipped. Dropping the feed closes the
    /// pipeline's channel, which lets outstanding submissions settle.
    pub async fn run<R>(self, reader: R, cancel: CancellationToken)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        match self.handle_line(text).await {
                            Ok(()) => {}
                            Err(FeedError::PipelineClosed) => {
                                tracing::warn!("Annotation pipeline closed, stopping draw feed");
                                break;
                            }
                            Err(e) => tracing::warn!(error = %e, "Ignoring input line"),
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Draw feed reached end of input");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read draw feed");
                        break;
                    }
                },
            }
        }
    }
}
