#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use xlinks::{
    Branch, CallContext, DataType, FieldType, Generator, Input, ModuleHandle, Program, Schema,
};

use common::{user_message, MockProvider};

fn query() -> DataType {
    DataType::new("Query", &Schema::new().field("query", FieldType::String))
}

/// Routes every question to `choice`; answers everything else from the query.
fn provider(choice: &'static str) -> Arc<MockProvider> {
    MockProvider::new(move |request| {
        let input: Value = serde_json::from_str(user_message(request)).unwrap();
        if input.get("question").is_some() {
            return json!({ "thinking": "looks tricky", "choice": choice }).to_string();
        }
        let query = input["query"].as_str().unwrap_or_default();
        if input.get("choice").is_some() && request.messages[0].content.contains("rigorous") {
            json!({ "answer": format!("proof of {query}"), "steps": 3 }).to_string()
        } else {
            json!({ "answer": format!("quick {query}") }).to_string()
        }
    })
}

fn branch(provider: &Arc<MockProvider>, name: &str) -> ModuleHandle {
    let lm = provider.language_model();
    let easy = ModuleHandle::new(
        Generator::builder(Schema::new().field("answer", FieldType::String), lm.clone())
            .name(format!("{name}_easy"))
            .build()
            .unwrap(),
    );
    let hard = ModuleHandle::new(
        Generator::builder(
            Schema::new()
                .field("answer", FieldType::String)
                .field("steps", FieldType::Integer),
            lm.clone(),
        )
        .name(format!("{name}_hard"))
        .instructions("Give a rigorous answer.")
        .build()
        .unwrap(),
    );
    ModuleHandle::new(
        Branch::builder(
            "How difficult is the query?",
            vec!["easy".into(), "hard".into()],
            vec![easy, hard],
            lm,
        )
        .name(name)
        .build()
        .unwrap(),
    )
}

#[tokio::test]
async fn test_branch_selects_one_slot() {
    let provider = provider("hard");
    let branch = branch(&provider, "router");
    let ctx = CallContext::new();
    let input = query().instantiate(json!({"query": "P != NP"})).unwrap();

    let outputs = branch.forward(vec![Some(input)], &ctx).await.unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(outputs[0].is_none());
    assert_eq!(
        outputs[1].as_ref().unwrap().json(),
        &json!({
            "thinking": "looks tricky",
            "choice": "hard",
            "answer": "proof of P != NP",
            "steps": 3
        })
    );
    // one decision call, one branch call
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_absent_input_skips_decision() {
    let provider = provider("easy");
    let branch = branch(&provider, "idle_router");
    let outputs = branch.forward(vec![None], &CallContext::new()).await.unwrap();
    assert_eq!(outputs, vec![None, None]);
    assert_eq!(provider.call_count(), 0);
}

#[test]
fn test_tracing_infers_every_branch() {
    let provider = provider("easy");
    let branch = branch(&provider, "traced_router");
    let x = Input::new(&query());
    let outputs = branch.trace(&[Some(x)]).unwrap();
    let names: Vec<Vec<&str>> = outputs
        .iter()
        .map(|o| o.as_ref().unwrap().schema().field_names())
        .collect();
    assert_eq!(
        names,
        vec![
            vec!["thinking", "choice", "answer"],
            vec!["thinking", "choice", "answer", "steps"],
        ]
    );
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_branch_inside_program() {
    let provider = provider("easy");
    let branch = branch(&provider, "program_router");
    let x = Input::new(&query());
    let outputs: Vec<_> = branch
        .trace(&[Some(x.clone())])
        .unwrap()
        .into_iter()
        .map(Option::unwrap)
        .collect();
    let program = Program::new(vec![x], outputs).unwrap();
    assert_eq!(program.variables().len(), 3);

    let outputs = program
        .run(
            vec![Some(query().instantiate(json!({"query": "2+2"})).unwrap())],
            &CallContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        outputs[0].as_ref().unwrap().get("answer"),
        Some(&json!("quick 2+2"))
    );
    assert!(outputs[1].is_none());
}

#[tokio::test]
async fn test_decision_can_stay_out_of_branch_io() {
    let provider = provider("easy");
    let lm = provider.language_model();
    let easy = ModuleHandle::new(
        Generator::builder(Schema::new().field("answer", FieldType::String), lm.clone())
            .build()
            .unwrap(),
    );
    let branch = ModuleHandle::new(
        Branch::builder("Easy?", vec!["easy".into()], vec![easy], lm)
            .inject_decision(false)
            .return_decision(false)
            .build()
            .unwrap(),
    );
    let input = query().instantiate(json!({"query": "hi"})).unwrap();
    let outputs = branch
        .forward(vec![Some(input)], &CallContext::new())
        .await
        .unwrap();
    assert_eq!(outputs[0].as_ref().unwrap().json(), &json!({"answer": "quick hi"}));
    let branch_request = &provider.requests()[1];
    assert_eq!(user_message(branch_request), r#"{"query":"hi"}"#);
}

#[tokio::test]
async fn test_decision_schema_asks_for_thinking_first() {
    let provider = provider("easy");
    let branch = branch(&provider, "ordered_router");
    let input = query().instantiate(json!({"query": "1+1"})).unwrap();
    branch
        .forward(vec![Some(input)], &CallContext::new())
        .await
        .unwrap();
    let requests = provider.requests();
    let keys: Vec<&str> = requests[0]
        .response_schema
        .as_ref()
        .unwrap()["properties"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["thinking", "choice"]);
}

#[tokio::test]
async fn test_label_without_module_returns_the_decision() {
    let provider = provider("skip");
    let lm = provider.language_model();
    let answer = ModuleHandle::new(
        Generator::builder(Schema::new().field("answer", FieldType::String), lm.clone())
            .build()
            .unwrap(),
    );
    let branch = ModuleHandle::new(
        Branch::builder(
            "Is the query worth answering?",
            vec!["answer".into(), "skip".into()],
            vec![Some(answer), None],
            lm,
        )
        .name("gate")
        .build()
        .unwrap(),
    );

    let x = Input::new(&query());
    let outputs = branch.trace(&[Some(x)]).unwrap();
    let traced: Vec<Vec<&str>> = outputs
        .iter()
        .map(|o| o.as_ref().unwrap().schema().field_names())
        .collect();
    assert_eq!(
        traced,
        vec![vec!["thinking", "choice", "answer"], vec!["thinking", "choice"]]
    );

    let input = query().instantiate(json!({"query": "spam"})).unwrap();
    let selected = branch
        .forward(vec![Some(input)], &CallContext::new())
        .await
        .unwrap();
    assert!(selected[0].is_none());
    assert_eq!(
        selected[1].as_ref().unwrap().json(),
        &json!({"thinking": "looks tricky", "choice": "skip"})
    );
    assert_eq!(provider.call_count(), 1);
}
