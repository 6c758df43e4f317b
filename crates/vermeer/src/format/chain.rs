use super::{FormattedFile, Formatter};
use crate::source::FileSource;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{debug, instrument};
use vermeer_error::VermeerResult;

/// Runs formatters in sequence, feeding each output to the next stage.
///
/// Declines when any stage declines. Every intermediate output is removed
/// once the next stage has consumed it, including when a stage fails.
pub struct ChainFormatter {
    stages: Vec<Arc<dyn Formatter>>,
}

impl ChainFormatter {
    /// Chain `stages` in order.
    pub fn new(stages: Vec<Arc<dyn Formatter>>) -> Self {
        Self { stages }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait::async_trait]
impl Formatter for ChainFormatter {
    #[instrument(skip_all, fields(stages = self.stages.len()))]
    async fn format(
        &self,
        source: &FileSource,
        storage: &Arc<Storage>,
    ) -> VermeerResult<Option<FormattedFile>> {
        let mut current: Option<FormattedFile> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let input = match &current {
                Some(previous) => previous.source(),
                None => source.clone(),
            };
            // Assigning drops the previous output, which removes its file.
            match stage.format(&input, storage).await? {
                Some(output) => current = Some(output),
                None => {
                    debug!(stage = index, "Chain stage declined");
                    return Ok(None);
                }
            }
        }

        Ok(current)
    }
}
