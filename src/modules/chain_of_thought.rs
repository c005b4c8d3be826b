use std::sync::Arc;

use async_trait::async_trait;

use super::generator::{thinking_schema, Generator, GeneratorBuilder};
use crate::core::context::CallContext;
use crate::core::naming::auto_name;
use crate::core::value::JsonDataModel;
use crate::core::variable::validate_name;
use crate::error::{OpError, OpResult};
use crate::llm::LanguageModel;
use crate::modules::{Module, ModuleHandle};
use crate::schema::Schema;

/// A generator that writes `k` thinking fields before the target fields.
pub struct ChainOfThought {
    name: String,
    generator: ModuleHandle,
}

impl ChainOfThought {
    /// `configure` adjusts the inner generator (hints, examples, template, ...).
    pub fn new(
        schema: &Schema,
        language_model: Arc<LanguageModel>,
        k: usize,
        name: Option<String>,
        configure: impl FnOnce(GeneratorBuilder) -> GeneratorBuilder,
    ) -> OpResult<Self> {
        if k == 0 {
            return Err(OpError::ConfigError(
                "chain of thought requires at least one thinking field".into(),
            ));
        }
        let name = match name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => auto_name("chain_of_thought"),
        };
        let builder = Generator::builder(thinking_schema(k, schema), language_model)
            .name(format!("{}_generator", name));
        let generator = configure(builder).build()?;
        Ok(Self {
            name,
            generator: ModuleHandle::new(generator),
        })
    }
}

#[async_trait]
impl Module for ChainOfThought {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, input_schemas: &[Option<Schema>], ctx: &CallContext) -> OpResult<()> {
        self.generator.ensure_built(input_schemas, ctx)
    }

    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        self.generator.infer(input_schemas, ctx)
    }

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        self.generator.forward(inputs, ctx).await
    }

    fn submodules(&self) -> Vec<ModuleHandle> {
        vec![self.generator.clone()]
    }
}
