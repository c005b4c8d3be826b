#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use xlinks::store::{load_from, save_to};
use xlinks::{
    CallContext, DataType, ExactMatch, FieldType, FileVariableStore, Generator, GeneratorState,
    Input, JsonDataModel, MemoryVariableStore, ModuleHandle, Program, RandomFewShot, Saveable,
    Schema, StoreMap, Trainer, TrainingConfig,
};

use common::{init_tracing, user_message, MockProvider};

fn query() -> DataType {
    DataType::new("Query", &Schema::new().field("query", FieldType::String))
}

fn answer() -> DataType {
    DataType::new("Answer", &Schema::new().field("answer", FieldType::String))
}

/// Knows the capital of every country except Peru.
fn geography_provider() -> Arc<MockProvider> {
    MockProvider::new(|request| {
        let input: Value = serde_json::from_str(user_message(request)).unwrap();
        let city = match input["query"].as_str().unwrap_or_default() {
            "France" => "Paris",
            "Japan" => "Tokyo",
            "Kenya" => "Nairobi",
            _ => "Unknown",
        };
        json!({ "answer": city }).to_string()
    })
}

fn dataset() -> (Vec<JsonDataModel>, Vec<JsonDataModel>) {
    let pairs = [
        ("France", "Paris"),
        ("Japan", "Tokyo"),
        ("Kenya", "Nairobi"),
        ("Peru", "Lima"),
    ];
    let x = pairs
        .iter()
        .map(|(q, _)| query().instantiate(json!({ "query": q })).unwrap())
        .collect();
    let y = pairs
        .iter()
        .map(|(_, a)| answer().instantiate(json!({ "answer": a })).unwrap())
        .collect();
    (x, y)
}

fn capital_program(provider: &Arc<MockProvider>, name: &str) -> (Program, Arc<Generator>) {
    let generator = Arc::new(
        Generator::builder(answer().schema().clone(), provider.language_model())
            .name(format!("{name}_generator"))
            .instructions("Name the capital city of the given country.")
            .build()
            .unwrap(),
    );
    let x = Input::new(&query());
    let y = ModuleHandle::from_arc(generator.clone()).trace_one(&x).unwrap();
    let program = Program::with_name(vec![x], vec![y], name, None).unwrap();
    (program, generator)
}

fn generator_state(generator: &Generator) -> GeneratorState {
    serde_json::from_value(generator.state().unwrap().payload().unwrap()).unwrap()
}

#[tokio::test]
async fn test_fit_selects_examples_and_finalizes() {
    init_tracing();
    let provider = geography_provider();
    let (program, generator) = capital_program(&provider, "capitals");
    let trainer = Trainer::new(
        program,
        ExactMatch::new(),
        RandomFewShot::with_seed(2, 3, 7).unwrap(),
    );
    let (x, y) = dataset();
    let config = TrainingConfig {
        epochs: 2,
        batch_size: 2,
        seed: None,
    };

    let history = trainer.fit(&x, &y, &config).await.unwrap();
    assert_eq!(history.rewards, vec![0.75, 0.75]);
    assert_eq!(trainer.optimizer().state().iterations(&CallContext::new()).unwrap(), 4);

    let state = generator_state(&generator);
    assert!(state.predictions.is_empty());
    assert_eq!(state.examples.len(), 2);

    // selected examples now show up in the prompt
    let before = provider.call_count();
    let score = trainer.evaluate(&x, &y).await.unwrap();
    assert_eq!(score, 0.75);
    let requests = provider.requests();
    assert_eq!(requests.len(), before + 4);
    let example_query = state.examples[0].inputs["query"].as_str().unwrap();
    assert!(requests[before].messages[0].content.contains(example_query));
    assert!(generator_state(&generator).predictions.is_empty());
}

#[tokio::test]
async fn test_fit_rejects_misaligned_dataset() {
    let provider = geography_provider();
    let (program, _) = capital_program(&provider, "misaligned");
    let trainer = Trainer::new(program, ExactMatch::new(), RandomFewShot::new(1, 1).unwrap());
    let (x, mut y) = dataset();
    y.pop();
    assert!(trainer.fit(&x, &y, &TrainingConfig::default()).await.is_err());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_program_state_survives_a_store_round_trip() {
    let provider = geography_provider();
    let (program, generator) = capital_program(&provider, "stored");
    let store = MemoryVariableStore::new();
    save_to(&program, &store).await.unwrap();

    let variable = generator.state().unwrap().clone();
    let ctx = CallContext::new();
    variable
        .assign(
            json!({"examples": [], "hints": ["overwritten"], "predictions": []}),
            &ctx,
        )
        .unwrap();
    assert_eq!(generator_state(&generator).hints, vec!["overwritten".to_string()]);

    assert_eq!(load_from(&program, &store).await.unwrap(), 1);
    assert!(generator_state(&generator).hints.is_empty());
}

#[tokio::test]
async fn test_file_store_uses_variable_paths() {
    let provider = geography_provider();
    let (program, _) = capital_program(&provider, "filed");
    let dir = tempfile::tempdir().unwrap();
    let store = FileVariableStore::new(dir.path()).unwrap();
    save_to(&program, &store).await.unwrap();

    let mut map = StoreMap::new();
    program.save_own_variables(&mut map).unwrap();
    assert_eq!(
        map.keys().collect::<Vec<_>>(),
        vec!["filed_generator/state"]
    );
    assert_eq!(load_from(&program, &store).await.unwrap(), 1);

    // a store written for a different shape is ignored
    map.insert("extra".into(), json!({}));
    assert_eq!(program.load_own_variables(&map).unwrap(), 0);
}

#[tokio::test]
async fn test_training_call_commits_predictions_on_success() {
    let provider = geography_provider();
    let (program, generator) = capital_program(&provider, "committed");
    let (x, _) = dataset();
    program
        .run_one(x[0].clone(), &CallContext::training())
        .await
        .unwrap();
    let state = generator_state(&generator);
    assert_eq!(state.predictions.len(), 1);
    assert_eq!(state.predictions[0].outputs, json!({"answer": "Paris"}));
}

#[tokio::test]
async fn test_failed_training_call_commits_nothing() {
    let provider = geography_provider();
    let lm = provider.language_model();
    let answerer = Arc::new(
        Generator::builder(answer().schema().clone(), lm.clone())
            .name("aborted_answerer")
            .build()
            .unwrap(),
    );
    // the provider never produces a verdict, so this node always fails
    let judge = ModuleHandle::new(
        Generator::builder(Schema::new().field("verdict", FieldType::Boolean), lm)
            .name("aborted_judge")
            .build()
            .unwrap(),
    );
    let x = Input::new(&query());
    let y = ModuleHandle::from_arc(answerer.clone()).trace_one(&x).unwrap();
    let z = judge.trace_one(&y).unwrap();
    let program = Program::new(vec![x], vec![z]).unwrap();

    let input = query().instantiate(json!({"query": "France"})).unwrap();
    let result = program.run_one(input, &CallContext::training()).await;
    assert!(result.is_err());
    assert_eq!(provider.call_count(), 2);
    assert!(generator_state(&answerer).predictions.is_empty());
}
