//! Template rendering with Tera.

use std::error::Error as _;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tera::{Context, Tera};

use courier_core::{CourierError, CourierResult, RenderEngine, TemplateRenderer};

/// Renders `tera` templates with autoescaping off; `plain` content passes
/// through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraRenderer;

impl TeraRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TemplateRenderer for TeraRenderer {
    async fn render(
        &self,
        content: &str,
        data: &Map<String, Value>,
        engine: RenderEngine,
    ) -> CourierResult<String> {
        match engine {
            RenderEngine::Plain => Ok(content.to_string()),
            RenderEngine::Tera => {
                let mut context = Context::new();
                for (key, value) in data {
                    context.insert(key.as_str(), value);
                }
                Tera::one_off(content, &context, false)
                    .map_err(|e| CourierError::Render(render_error_chain(&e)))
            }
        }
    }
}

/// Tera hides the useful part of a failure in its source chain.
fn render_error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_renders_tera_without_escaping() {
        let out = TeraRenderer
            .render(
                "{{ project }} <{{ url }}> by {{ courier.trigger }}",
                &data(json!({"project": "core", "url": "https://x/?a=1&b=2", "courier": {"trigger": "push"}})),
                RenderEngine::Tera,
            )
            .await
            .unwrap();
        assert_eq!(out, "core <https://x/?a=1&b=2> by push");
    }

    #[tokio::test]
    async fn test_plain_passthrough() {
        let out = TeraRenderer
            .render("{{ untouched }}", &Map::new(), RenderEngine::Plain)
            .await
            .unwrap();
        assert_eq!(out, "{{ untouched }}");
    }

    #[tokio::test]
    async fn test_missing_variable_is_render_error() {
        let err = TeraRenderer
            .render("{{ nope }}", &Map::new(), RenderEngine::Tera)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Render(_)));
    }
}
