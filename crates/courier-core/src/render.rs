//! Template rendering contract.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::CourierResult;
use crate::model::RenderEngine;

/// Renders template content against merged data.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        content: &str,
        data: &Map<String, Value>,
        engine: RenderEngine,
    ) -> CourierResult<String>;
}
