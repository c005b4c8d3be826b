use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::generator::Generator;
use crate::core::context::CallContext;
use crate::core::naming::auto_name;
use crate::core::value::{concat_values, JsonDataModel};
use crate::core::variable::validate_name;
use crate::error::{OpError, OpResult};
use crate::llm::LanguageModel;
use crate::modules::{Module, ModuleHandle};
use crate::schema::{concat_schemas, Field, FieldType, Schema};

const DECISION_INSTRUCTIONS: &str =
    "You will be given a question and an input. Think step by step, then choose \
     exactly one of the allowed labels as your answer.";

/// Output schema of a decision over `labels`.
pub fn decision_schema(labels: &[String]) -> Schema {
    Schema::new()
        .with_field(Field::new("thinking", FieldType::String).describe("Your step by step thinking"))
        .with_field(
            Field::new("choice", FieldType::Enum(labels.to_vec()))
                .describe("The label you chose"),
        )
}

fn question_schema() -> Schema {
    Schema::new().field("question", FieldType::String)
}

pub struct DecisionBuilder {
    question: String,
    labels: Vec<String>,
    language_model: Arc<LanguageModel>,
    name: Option<String>,
    examples: Vec<(serde_json::Value, serde_json::Value)>,
    hints: Vec<String>,
    prompt_template: Option<String>,
    use_inputs_schema: bool,
    use_outputs_schema: bool,
    trainable: bool,
}

impl DecisionBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn examples(mut self, examples: Vec<(serde_json::Value, serde_json::Value)>) -> Self {
        self.examples = examples;
        self
    }

    pub fn hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn use_inputs_schema(mut self, enabled: bool) -> Self {
        self.use_inputs_schema = enabled;
        self
    }

    pub fn use_outputs_schema(mut self, enabled: bool) -> Self {
        self.use_outputs_schema = enabled;
        self
    }

    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn build(self) -> OpResult<Decision> {
        let name = match self.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => auto_name("decision"),
        };
        if self.labels.is_empty() {
            return Err(OpError::ConfigError(format!(
                "decision `{}` requires at least one label",
                name
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(OpError::ConfigError(format!(
                "decision `{}` has duplicate label `{}`",
                name, dup
            )));
        }

        let mut generator = Generator::builder(decision_schema(&self.labels), self.language_model)
            .name(format!("{}_generator", name))
            .instructions(DECISION_INSTRUCTIONS)
            .examples(self.examples)
            .hints(self.hints)
            .use_inputs_schema(self.use_inputs_schema)
            .use_outputs_schema(self.use_outputs_schema)
            .trainable(self.trainable);
        if let Some(template) = self.prompt_template {
            generator = generator.prompt_template(template);
        }

        Ok(Decision {
            name,
            question: self.question,
            labels: self.labels,
            generator: ModuleHandle::new(generator.build()?),
        })
    }
}

/// Chooses one label out of a fixed set, given a question and an input.
pub struct Decision {
    name: String,
    question: String,
    labels: Vec<String>,
    generator: ModuleHandle,
}

impl Decision {
    pub fn builder(
        question: impl Into<String>,
        labels: Vec<String>,
        language_model: Arc<LanguageModel>,
    ) -> DecisionBuilder {
        DecisionBuilder {
            question: question.into(),
            labels,
            language_model,
            name: None,
            examples: Vec::new(),
            hints: Vec::new(),
            prompt_template: None,
            use_inputs_schema: false,
            use_outputs_schema: false,
            trainable: true,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn generator_input_schema(&self, input: &Schema) -> Schema {
        concat_schemas(&[&question_schema(), input])
    }
}

#[async_trait]
impl Module for Decision {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, input_schemas: &[Option<Schema>], ctx: &CallContext) -> OpResult<()> {
        if let Some(Some(input)) = input_schemas.first() {
            self.generator
                .ensure_built(&[Some(self.generator_input_schema(input))], ctx)?;
        }
        Ok(())
    }

    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        let Some(Some(input)) = input_schemas.first() else {
            return Ok(vec![None]);
        };
        self.generator
            .infer(&[Some(self.generator_input_schema(input))], ctx)
    }

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        let Some(Some(input)) = inputs.into_iter().next() else {
            return Ok(vec![None]);
        };
        let question = JsonDataModel::new(&question_schema(), json!({ "question": self.question }))?;
        let prompt = concat_values(&[&question, &input])?;
        self.generator.forward(vec![Some(prompt)], ctx).await
    }

    fn submodules(&self) -> Vec<ModuleHandle> {
        vec![self.generator.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn labels() -> Vec<String> {
        vec!["easy".into(), "hard".into()]
    }

    #[test]
    fn test_label_validation() {
        let provider = ScriptedProvider::new(vec![]);
        let lm = Arc::new(provider.language_model());
        assert!(matches!(
            Decision::builder("q", vec![], lm.clone()).build(),
            Err(OpError::ConfigError(_))
        ));
        assert!(matches!(
            Decision::builder("q", vec!["a".into(), "a".into()], lm).build(),
            Err(OpError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_decision_injects_question_and_constrains_choice() {
        let provider = ScriptedProvider::new(vec![
            r#"{"thinking": "long proof", "choice": "hard"}"#,
            r#"{"thinking": "?", "choice": "medium"}"#,
        ]);
        let decision = ModuleHandle::new(
            Decision::builder("How hard is this?", labels(), Arc::new(provider.language_model()))
                .name("difficulty")
                .build()
                .unwrap(),
        );
        let ctx = CallContext::new();
        let input = JsonDataModel::from_value(json!({"query": "Prove P != NP"})).unwrap();
        let out = decision.forward(vec![Some(input.clone())], &ctx).await.unwrap();
        assert_eq!(out[0].as_ref().unwrap().get("choice"), Some(&json!("hard")));

        let sent = &provider.requests()[0].messages[1].content;
        assert!(sent.contains("How hard is this?"));
        assert!(sent.contains("Prove P != NP"));

        // a label outside the set fails validation
        assert!(decision.forward(vec![Some(input)], &ctx).await.is_err());
    }
}
