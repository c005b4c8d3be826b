//! Decision-gated routing to one of several modules.

use std::sync::Arc;

use async_trait::async_trait;

use super::decision::Decision;
use super::merging::MergeKind;
use crate::core::context::CallContext;
use crate::core::naming::auto_name;
use crate::core::value::{concat_values, JsonDataModel};
use crate::core::variable::validate_name;
use crate::error::{OpError, OpResult};
use crate::llm::LanguageModel;
use crate::modules::{Module, ModuleHandle};
use crate::schema::{concat_schemas, Schema};

pub struct BranchBuilder {
    question: String,
    labels: Vec<String>,
    branches: Vec<Option<ModuleHandle>>,
    language_model: Arc<LanguageModel>,
    name: Option<String>,
    description: Option<String>,
    inject_decision: bool,
    return_decision: bool,
    decision_hints: Vec<String>,
    decision_examples: Vec<(serde_json::Value, serde_json::Value)>,
    prompt_template: Option<String>,
    trainable: bool,
}

impl BranchBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Concatenate the decision into the selected branch's input.
    pub fn inject_decision(mut self, enabled: bool) -> Self {
        self.inject_decision = enabled;
        self
    }

    /// Concatenate the decision in front of the selected branch's output.
    pub fn return_decision(mut self, enabled: bool) -> Self {
        self.return_decision = enabled;
        self
    }

    pub fn decision_hints(mut self, hints: Vec<String>) -> Self {
        self.decision_hints = hints;
        self
    }

    pub fn decision_examples(
        mut self,
        examples: Vec<(serde_json::Value, serde_json::Value)>,
    ) -> Self {
        self.decision_examples = examples;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn build(self) -> OpResult<Branch> {
        let name = match self.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => auto_name("branch"),
        };
        if self.branches.is_empty() {
            return Err(OpError::ConfigError(format!(
                "branch `{}` requires at least one branch",
                name
            )));
        }
        if self.labels.len() != self.branches.len() {
            return Err(OpError::ConfigError(format!(
                "branch `{}` has {} labels but {} branches",
                name,
                self.labels.len(),
                self.branches.len()
            )));
        }

        let mut decision = Decision::builder(self.question, self.labels.clone(), self.language_model)
            .name(format!("{}_decision", name))
            .hints(self.decision_hints)
            .examples(self.decision_examples)
            .trainable(self.trainable);
        if let Some(template) = self.prompt_template {
            decision = decision.prompt_template(template);
        }

        Ok(Branch {
            name,
            description: self.description,
            decision: ModuleHandle::new(decision.build()?),
            labels: self.labels,
            branches: self.branches,
            inject_decision: self.inject_decision,
            return_decision: self.return_decision,
        })
    }
}

/// Routes its input to the branch whose label the decision picks.
///
/// Returns one output slot per label: the selected branch's output, and
/// `None` everywhere else. A `None` input yields all `None` without calling
/// the decision. A label without a module yields the decision alone when
/// decisions are returned, `None` otherwise.
pub struct Branch {
    name: String,
    description: Option<String>,
    decision: ModuleHandle,
    labels: Vec<String>,
    branches: Vec<Option<ModuleHandle>>,
    inject_decision: bool,
    return_decision: bool,
}

impl Branch {
    /// `branches` aligns with `labels`; pass `None` for a label that only
    /// reports the decision.
    pub fn builder<B: Into<Option<ModuleHandle>>>(
        question: impl Into<String>,
        labels: Vec<String>,
        branches: impl IntoIterator<Item = B>,
        language_model: Arc<LanguageModel>,
    ) -> BranchBuilder {
        BranchBuilder {
            question: question.into(),
            labels,
            branches: branches.into_iter().map(Into::into).collect(),
            language_model,
            name: None,
            description: None,
            inject_decision: true,
            return_decision: true,
            decision_hints: Vec::new(),
            decision_examples: Vec::new(),
            prompt_template: None,
            trainable: true,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn merged_input_schema(input_schemas: &[Option<Schema>]) -> OpResult<Option<Schema>> {
        let schemas: Vec<Option<&Schema>> = input_schemas.iter().map(Option::as_ref).collect();
        MergeKind::And.merge_schemas(&schemas)
    }

    fn decision_output_schema(&self, input: &Schema, ctx: &CallContext) -> OpResult<Schema> {
        self.decision
            .infer(&[Some(input.clone())], ctx)?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| {
                OpError::SchemaMismatch(format!("decision of `{}` produced no output", self.name))
            })
    }

    fn branch_input_schema(&self, input: &Schema, decision: &Schema) -> Schema {
        if self.inject_decision {
            concat_schemas(&[input, decision])
        } else {
            input.clone()
        }
    }
}

#[async_trait]
impl Module for Branch {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn build(&self, input_schemas: &[Option<Schema>], ctx: &CallContext) -> OpResult<()> {
        let Some(input) = Self::merged_input_schema(input_schemas)? else {
            return Ok(());
        };
        self.decision.ensure_built(&[Some(input.clone())], ctx)?;
        let decision = self.decision_output_schema(&input, ctx)?;
        let branch_input = self.branch_input_schema(&input, &decision);
        for branch in self.branches.iter().flatten() {
            branch.ensure_built(&[Some(branch_input.clone())], ctx)?;
        }
        Ok(())
    }

    /// Every branch is inferred, since the choice is unknown while tracing.
    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        let Some(input) = Self::merged_input_schema(input_schemas)? else {
            return Ok(vec![None; self.branches.len()]);
        };
        let decision = self.decision_output_schema(&input, ctx)?;
        let branch_input = self.branch_input_schema(&input, &decision);
        let mut outputs = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            let Some(branch) = branch else {
                outputs.push(self.return_decision.then(|| decision.clone()));
                continue;
            };
            let output = branch
                .infer(&[Some(branch_input.clone())], ctx)?
                .into_iter()
                .next()
                .flatten();
            outputs.push(match output {
                Some(output) if self.return_decision => {
                    Some(concat_schemas(&[&decision, &output]))
                }
                other => other,
            });
        }
        Ok(outputs)
    }

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        let merged = {
            let values: Vec<Option<&JsonDataModel>> = inputs.iter().map(Option::as_ref).collect();
            MergeKind::And.merge_values(&values)?
        };
        let mut outputs: Vec<Option<JsonDataModel>> = vec![None; self.branches.len()];
        let Some(input) = merged else {
            return Ok(outputs);
        };

        let decision = self
            .decision
            .forward(vec![Some(input.clone())], ctx)
            .await?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| {
                OpError::SchemaMismatch(format!("decision of `{}` produced no output", self.name))
            })?;
        let choice = decision
            .get("choice")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                OpError::SchemaMismatch(format!("decision of `{}` has no choice", self.name))
            })?;
        let Some(selected) = self.labels.iter().position(|l| l == choice) else {
            return Err(OpError::ValidationError(format!(
                "`{}` is not a label of branch `{}`",
                choice, self.name
            )));
        };
        tracing::debug!(branch = %self.name, choice, "branch selected");

        let Some(module) = &self.branches[selected] else {
            outputs[selected] = self.return_decision.then_some(decision);
            return Ok(outputs);
        };
        let branch_input = if self.inject_decision {
            concat_values(&[&input, &decision])?
        } else {
            input
        };
        let output = module
            .forward(vec![Some(branch_input)], ctx)
            .await?
            .into_iter()
            .next()
            .flatten();
        outputs[selected] = match output {
            Some(output) if self.return_decision => Some(concat_values(&[&decision, &output])?),
            other => other,
        };
        Ok(outputs)
    }

    fn submodules(&self) -> Vec<ModuleHandle> {
        let mut modules = vec![self.decision.clone()];
        modules.extend(self.branches.iter().flatten().cloned());
        modules
    }
}
