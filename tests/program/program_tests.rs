#[path = "../common/mod.rs"]
mod common;

use serde_json::{json, Value};
use xlinks::{
    concat, CallContext, Data, DataType, FieldType, Generator, GeneratorState, Input,
    ModuleHandle, Program, ProgramError, Schema, SymbolicDataModel,
};

use common::{user_message, MockProvider};

fn query() -> DataType {
    DataType::new("Query", &Schema::new().field("query", FieldType::String))
}

fn answer() -> Schema {
    Schema::new().field("answer", FieldType::String)
}

fn symbolic(data: Option<Data>) -> SymbolicDataModel {
    data.and_then(|d| d.as_symbolic().cloned()).unwrap()
}

/// Upper-cases the `query` of the incoming user message.
fn shouting_provider() -> std::sync::Arc<MockProvider> {
    MockProvider::new(|request| {
        let input: Value = serde_json::from_str(user_message(request)).unwrap();
        let query = input["query"].as_str().unwrap_or_default().to_uppercase();
        json!({ "answer": query }).to_string()
    })
}

#[tokio::test]
async fn test_concat_program_renames_collisions() {
    let x = Input::new(&query());
    let y = symbolic(concat(&[Some(x.clone().into()), Some(x.clone().into())]).unwrap());
    let program = Program::new(vec![x], vec![y]).unwrap();

    let out = program
        .run_one(query().instantiate(json!({"query": "a"})).unwrap(), &CallContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out.json(), &json!({"query": "a", "query_1": "a"}));
}

#[tokio::test]
async fn test_missing_and_miscounted_inputs() {
    let x = Input::new(&query());
    let y = symbolic(concat(&[Some(x.clone().into())]).unwrap());
    let program = Program::new(vec![x], vec![y]).unwrap();
    let ctx = CallContext::new();

    let err = program.run(vec![None], &ctx).await.unwrap_err();
    assert!(matches!(err, ProgramError::MissingInput { index: 0, .. }));

    let err = program.run(vec![], &ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ProgramError::InputCountMismatch {
            expected: 1,
            found: 0
        }
    ));
}

#[test]
fn test_undeclared_input_is_rejected() {
    let x = Input::new(&query());
    let other = Input::named("other", &Schema::new().field("text", FieldType::String));
    let y = symbolic(concat(&[Some(x.clone().into()), Some(other.into())]).unwrap());
    let err = Program::new(vec![x], vec![y]).unwrap_err();
    assert!(matches!(err, ProgramError::GraphBuildError(_)));
}

#[tokio::test]
async fn test_generator_program_is_reentrant() {
    let provider = shouting_provider();
    let generator = ModuleHandle::new(
        Generator::builder(answer(), provider.language_model())
            .name("shouter")
            .build()
            .unwrap(),
    );
    let x = Input::new(&query());
    let y = generator.trace_one(&x).unwrap();
    assert_eq!(provider.call_count(), 0);

    let program = Program::new(vec![x], vec![y]).unwrap();
    assert_eq!(program.node_names(), vec!["query", "shouter"]);
    assert_eq!(program.variables()[0].path(), "shouter/state");
    assert!(program.variables()[0].is_initialized());

    let ctx = CallContext::new();
    let runs = ["a", "b", "c", "d"].map(|q| {
        let program = program.clone();
        let input = query().instantiate(json!({ "query": q })).unwrap();
        let ctx = &ctx;
        async move { program.run_one(input, ctx).await }
    });
    let outputs = futures::future::join_all(runs).await;
    let answers: Vec<Value> = outputs
        .into_iter()
        .map(|o| o.unwrap().unwrap().into_json())
        .collect();
    assert_eq!(
        answers,
        vec![
            json!({"answer": "A"}),
            json!({"answer": "B"}),
            json!({"answer": "C"}),
            json!({"answer": "D"}),
        ]
    );
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn test_programs_nest_as_modules() {
    let provider = shouting_provider();
    let generator = ModuleHandle::new(
        Generator::builder(answer(), provider.language_model())
            .name("inner_shouter")
            .build()
            .unwrap(),
    );
    let x = Input::new(&query());
    let y = generator.trace_one(&x).unwrap();
    let inner = Program::with_name(vec![x], vec![y], "inner", None).unwrap();

    let outer_x = Input::new(&query());
    let inner_out = ModuleHandle::new(inner).trace_one(&outer_x).unwrap();
    let merged = symbolic(concat(&[Some(outer_x.clone().into()), Some(inner_out.into())]).unwrap());
    let outer = Program::with_name(vec![outer_x], vec![merged], "outer", None).unwrap();
    assert_eq!(outer.variables().len(), 1);

    let out = outer
        .run_one(query().instantiate(json!({"query": "hi"})).unwrap(), &CallContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out.json(), &json!({"query": "hi", "answer": "HI"}));
}

#[tokio::test]
async fn test_node_failure_names_the_node() {
    let provider = MockProvider::new(|_| "not json at all".to_string());
    let generator = ModuleHandle::new(
        Generator::builder(answer(), provider.language_model())
            .name("broken")
            .build()
            .unwrap(),
    );
    let x = Input::new(&query());
    let y = generator.trace_one(&x).unwrap();
    let program = Program::new(vec![x], vec![y]).unwrap();

    let err = program
        .run_one(query().instantiate(json!({"query": "?"})).unwrap(), &CallContext::new())
        .await
        .unwrap_err();
    match err {
        ProgramError::NodeExecutionError { node, .. } => assert_eq!(node, "broken"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_nested_program_writes_commit_with_the_outer_call() {
    let provider = shouting_provider();
    let logger = ModuleHandle::new(
        Generator::builder(answer(), provider.language_model())
            .name("nested_logger")
            .build()
            .unwrap(),
    );
    let x = Input::new(&query());
    let y = logger.trace_one(&x).unwrap();
    let inner = ModuleHandle::new(Program::with_name(vec![x], vec![y], "logged", None).unwrap());

    let judge = ModuleHandle::new(
        Generator::builder(
            Schema::new().field("verdict", FieldType::Boolean),
            provider.language_model(),
        )
        .name("nested_judge")
        .build()
        .unwrap(),
    );
    let outer_x = Input::new(&query());
    let inner_out = inner.trace_one(&outer_x).unwrap();
    let judged = judge.trace_one(&inner_out).unwrap();
    let failing = Program::with_name(vec![outer_x.clone()], vec![judged], "judged", None).unwrap();
    let passing = Program::with_name(vec![outer_x], vec![inner_out], "passing", None).unwrap();

    let predictions = || {
        let state: GeneratorState =
            serde_json::from_value(logger.variables()[0].payload().unwrap()).unwrap();
        state.predictions.len()
    };
    let input = || query().instantiate(json!({"query": "hi"})).unwrap();

    let ctx = CallContext::training();
    assert!(failing.run_one(input(), &ctx).await.is_err());
    assert_eq!(predictions(), 0);

    passing.run_one(input(), &ctx).await.unwrap();
    assert_eq!(predictions(), 1);
}
