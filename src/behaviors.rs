//! Ready-made unit behaviors for template-driven analysis steps.
//!
//! Workflow steps in this domain share one shape: render a prompt template
//! against the unit's state, call the text-generation collaborator, validate
//! the output, persist the artifact, and spawn the dependent follow-up
//! units. [`TemplateAnalysis`] packages that shape; bespoke steps implement
//! [`UnitBehavior`](crate::unit::UnitBehavior) directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use crate::generation::TextGenerator;
use crate::store::StateStore;
use crate::unit::{UnitBehavior, UnitContext, UnitError, UnitInput};

/// Replace `{{key}}` placeholders in `template` from a JSON data map.
///
/// String values are inserted raw; other values use their JSON encoding.
/// Placeholders with no matching key are left untouched.
pub fn render_template(template: &str, data: &FxHashMap<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in data {
        let placeholder = format!("{{{{{key}}}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

/// A follow-up unit to spawn once an analysis step completes.
pub struct ChildSpec {
    pub unit_type: String,
    pub behavior: Arc<dyn UnitBehavior>,
}

/// Template-driven analysis behavior.
///
/// On execute: renders the prompt template against the unit's snapshot
/// state, calls the generator (optionally streaming chunks back onto the
/// event stream), rejects empty output, writes the artifact into the state
/// store under `artifact_key`, seeds and spawns the declared child units,
/// and emits `analysis:started` / `analysis:completed` progress events.
pub struct TemplateAnalysis {
    template: String,
    artifact_key: String,
    generator: Arc<dyn TextGenerator>,
    store: Arc<StateStore>,
    children: Vec<ChildSpec>,
    streaming: bool,
}

impl TemplateAnalysis {
    pub fn new(
        template: impl Into<String>,
        artifact_key: impl Into<String>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            template: template.into(),
            artifact_key: artifact_key.into(),
            generator,
            store,
            children: Vec::new(),
            streaming: false,
        }
    }

    /// Declare a child unit to spawn on completion.
    #[must_use]
    pub fn with_child(mut self, unit_type: impl Into<String>, behavior: Arc<dyn UnitBehavior>) -> Self {
        self.children.push(ChildSpec {
            unit_type: unit_type.into(),
            behavior,
        });
        self
    }

    /// Stream generation chunks as `analysis:chunk` events instead of
    /// waiting for the whole response.
    #[must_use]
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    async fn generate(&self, prompt: &str, ctx: &UnitContext) -> Result<String, UnitError> {
        if !self.streaming {
            return Ok(self.generator.generate(prompt).await?);
        }

        let mut stream = self.generator.generate_stream(prompt).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            ctx.emit("analysis:chunk", json!({ "chunk": chunk }))?;
            output.push_str(&chunk);
        }
        Ok(output)
    }
}

#[async_trait]
impl UnitBehavior for TemplateAnalysis {
    async fn execute(&self, _input: UnitInput, ctx: UnitContext) -> Result<(), UnitError> {
        ctx.emit(
            "analysis:started",
            json!({ "message": format!("starting {} analysis", ctx.unit_type()) }),
        )?;

        let prompt = render_template(&self.template, &ctx.state());
        let output = self.generate(&prompt, &ctx).await?;
        if output.trim().is_empty() {
            return Err(UnitError::ValidationFailed(
                "generator returned empty output".to_string(),
            ));
        }

        self.store
            .set(self.artifact_key.clone(), json!(output))
            .await?;
        ctx.set_state("artifact", json!({ "key": self.artifact_key }))?;

        // Follow-up units inherit this unit's state so their templates can
        // reference the same project data.
        for child in &self.children {
            let child_unit = ctx.spawn_child(child.unit_type.clone(), Arc::clone(&child.behavior));
            for (key, value) in ctx.state() {
                child_unit.set_state(key, value)?;
            }
        }

        ctx.emit(
            "analysis:completed",
            json!({ "artifact_key": self.artifact_key }),
        )?;
        Ok(())
    }
}
