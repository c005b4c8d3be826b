//! The language-model leaf operation.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::context::CallContext;
use crate::core::naming::auto_name;
use crate::core::value::{concat_values, JsonDataModel};
use crate::core::variable::{validate_name, Initializer, Variable};
use crate::error::{OpError, OpResult};
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};
use crate::modules::Module;
use crate::schema::{concat_schemas, standardize, Field, FieldType, Schema};
use crate::template::{PromptRenderer, DEFAULT_PROMPT_TEMPLATE};

/// One logged `(inputs, outputs, reward)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub inputs: Value,
    pub outputs: Value,
    pub reward: Option<f64>,
}

impl Prediction {
    pub fn schema() -> Schema {
        Schema::new()
            .field("inputs", FieldType::Any)
            .field("outputs", FieldType::Any)
            .field("reward", FieldType::Nullable(Box::new(FieldType::Number)))
    }
}

/// Payload of a generator's trainable `state` variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorState {
    pub examples: Vec<Prediction>,
    pub hints: Vec<String>,
    pub predictions: Vec<Prediction>,
}

impl GeneratorState {
    pub fn schema() -> Schema {
        let predictions = FieldType::Array(Box::new(FieldType::Object(Box::new(Prediction::schema()))));
        standardize(
            &Schema::new()
                .field("examples", predictions.clone())
                .field("hints", FieldType::Array(Box::new(FieldType::String)))
                .field("predictions", predictions),
        )
    }
}

pub struct GeneratorBuilder {
    schema: Schema,
    language_model: Arc<LanguageModel>,
    name: Option<String>,
    description: Option<String>,
    instructions: Option<String>,
    examples: Vec<(Value, Value)>,
    hints: Vec<String>,
    prompt_template: Option<String>,
    use_inputs_schema: bool,
    use_outputs_schema: bool,
    return_inputs: bool,
    streaming: bool,
    trainable: bool,
    options: Option<CompletionOptions>,
}

impl GeneratorBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Seed few-shot examples as `(inputs, outputs)` pairs.
    pub fn examples(mut self, examples: Vec<(Value, Value)>) -> Self {
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

    /// Return the inputs concatenated with the generated output.
    pub fn return_inputs(mut self, enabled: bool) -> Self {
        self.return_inputs = enabled;
        self
    }

    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn options(mut self, options: CompletionOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn build(self) -> OpResult<Generator> {
        let name = match self.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => auto_name("generator"),
        };
        if self.schema.is_empty() {
            return Err(OpError::ConfigError(format!(
                "generator `{}` requires a non-empty output schema",
                name
            )));
        }
        let renderer = PromptRenderer::new();
        let prompt_template = self
            .prompt_template
            .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string());
        renderer.compile(&prompt_template)?;

        let seed = GeneratorState {
            examples: self
                .examples
                .into_iter()
                .map(|(inputs, outputs)| Prediction {
                    inputs,
                    outputs,
                    reward: None,
                })
                .collect(),
            hints: self.hints,
            predictions: Vec::new(),
        };

        Ok(Generator {
            name,
            description: self.description,
            schema: standardize(&self.schema),
            language_model: self.language_model,
            instructions: self.instructions,
            seed,
            renderer,
            prompt_template,
            use_inputs_schema: self.use_inputs_schema,
            use_outputs_schema: self.use_outputs_schema,
            return_inputs: self.return_inputs,
            streaming: self.streaming,
            trainable: self.trainable,
            options: self.options,
            state: OnceLock::new(),
        })
    }
}

/// Calls a language model to produce a value of a fixed output schema.
///
/// Owns one trainable variable, `state`, holding the few-shot `examples`,
/// `hints`, and the `predictions` logged while training.
pub struct Generator {
    name: String,
    description: Option<String>,
    schema: Schema,
    language_model: Arc<LanguageModel>,
    instructions: Option<String>,
    seed: GeneratorState,
    renderer: PromptRenderer,
    prompt_template: String,
    use_inputs_schema: bool,
    use_outputs_schema: bool,
    return_inputs: bool,
    streaming: bool,
    trainable: bool,
    options: Option<CompletionOptions>,
    state: OnceLock<Variable>,
}

impl Generator {
    pub fn builder(schema: Schema, language_model: Arc<LanguageModel>) -> GeneratorBuilder {
        GeneratorBuilder {
            schema,
            language_model,
            name: None,
            description: None,
            instructions: None,
            examples: Vec::new(),
            hints: Vec::new(),
            prompt_template: None,
            use_inputs_schema: false,
            use_outputs_schema: false,
            return_inputs: false,
            streaming: false,
            trainable: true,
            options: None,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The `state` variable, once built.
    pub fn state(&self) -> Option<&Variable> {
        self.state.get()
    }

    fn state_variable(&self) -> OpResult<&Variable> {
        self.state.get().ok_or_else(|| {
            OpError::ConfigError(format!("generator `{}` has not been built", self.name))
        })
    }

    fn render_system_prompt(&self, state: &GeneratorState, input_schema: &Schema) -> OpResult<String> {
        let examples: Vec<Value> = state
            .examples
            .iter()
            .map(|e| json!({ "inputs": e.inputs, "outputs": e.outputs }))
            .collect();
        let variables = json!({
            "instructions": self.instructions,
            "hints": state.hints,
            "examples": examples,
            "inputs_schema": self.use_inputs_schema.then(|| input_schema.to_string()),
            "outputs_schema": self.use_outputs_schema.then(|| self.schema.to_string()),
        });
        self.renderer.render(&self.prompt_template, &variables)
    }
}

#[async_trait]
impl Module for Generator {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn build(&self, _input_schemas: &[Option<Schema>], ctx: &CallContext) -> OpResult<()> {
        if self.state.get().is_some() {
            return Ok(());
        }
        let seed = serde_json::to_value(&self.seed)?;
        let variable = Variable::builder("state")
            .schema(GeneratorState::schema())
            .initializer(Initializer::new(move |_| seed.clone()))
            .trainable(self.trainable)
            .build(ctx)?;
        // build runs once per handle; a lost race only drops the duplicate
        let _ = self.state.set(variable);
        Ok(())
    }

    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        _ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        let Some(Some(input)) = input_schemas.first() else {
            return Ok(vec![None]);
        };
        if self.return_inputs {
            Ok(vec![Some(concat_schemas(&[input, &self.schema]))])
        } else {
            Ok(vec![Some(self.schema.clone())])
        }
    }

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        let Some(Some(input)) = inputs.into_iter().next() else {
            return Ok(vec![None]);
        };
        let variable = self.state_variable()?;
        let state: GeneratorState = serde_json::from_value(variable.value(ctx)?)?;

        let system = self.render_system_prompt(&state, input.schema())?;
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(serde_json::to_string(input.json())?),
        ];
        let reply = self
            .language_model
            .call(
                &messages,
                Some(&self.schema),
                self.streaming,
                self.options.as_ref(),
                ctx,
            )
            .await?;
        let output = JsonDataModel::new(&self.schema, reply)?;

        if ctx.is_training() {
            let prediction = serde_json::to_value(Prediction {
                inputs: input.json().clone(),
                outputs: output.json().clone(),
                reward: None,
            })?;
            variable.update(ctx, |state| {
                match state.get_mut("predictions").and_then(Value::as_array_mut) {
                    Some(predictions) => {
                        predictions.push(prediction);
                        Ok(())
                    }
                    None => Err(OpError::SchemaMismatch(
                        "generator state has no `predictions` list".into(),
                    )),
                }
            })?;
        }

        if self.return_inputs {
            Ok(vec![Some(concat_values(&[&input, &output])?)])
        } else {
            Ok(vec![Some(output)])
        }
    }

    fn variables(&self) -> Vec<Variable> {
        self.state.get().cloned().into_iter().collect()
    }
}

/// Schema of `k` chain-of-thought fields followed by `schema`.
pub(crate) fn thinking_schema(k: usize, schema: &Schema) -> Schema {
    let thinking = Schema::new().with_field(
        Field::new("thinking", FieldType::String).describe("Your step by step thinking"),
    );
    let mut parts: Vec<&Schema> = std::iter::repeat(&thinking).take(k.max(1)).collect();
    parts.push(schema);
    concat_schemas(&parts)
}
