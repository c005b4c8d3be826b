use serde_json::json;
use xlinks::optimizers::random_few_shot::few_shot_schema;
use xlinks::{CallContext, GeneratorState, Optimizer, Prediction, RandomFewShot, Variable};

fn rewarded_state(count: usize) -> GeneratorState {
    GeneratorState {
        examples: vec![],
        hints: vec!["Answer briefly".into()],
        predictions: (0..count)
            .map(|i| Prediction {
                inputs: json!({ "query": format!("q{i}") }),
                outputs: json!({ "answer": format!("a{i}") }),
                reward: Some(i as f64 / count as f64),
            })
            .collect(),
    }
}

fn state_variable(name: &str, state: &GeneratorState) -> Variable {
    Variable::builder(name)
        .schema(GeneratorState::schema())
        .value(serde_json::to_value(state).unwrap())
        .build(&CallContext::new())
        .unwrap()
}

fn read(variable: &Variable) -> GeneratorState {
    serde_json::from_value(variable.payload().unwrap()).unwrap()
}

#[tokio::test]
async fn test_selects_k_from_top_k_best() {
    let optimizer = RandomFewShot::with_seed(3, 5, 11).unwrap();
    let variable = state_variable("top_k_state", &rewarded_state(12));
    let ctx = CallContext::new();

    optimizer.apply_optimization(&[variable.clone()], 0.0, &ctx).await.unwrap();
    let state = read(&variable);
    assert_eq!(state.examples.len(), 3);
    let threshold = 7.0 / 12.0;
    assert!(state
        .examples
        .iter()
        .all(|e| e.reward.unwrap() >= threshold));
    assert_eq!(state.predictions.len(), 12);
    assert_eq!(optimizer.state().iterations(&ctx).unwrap(), 1);

    optimizer
        .finalize_variable_values(&[variable.clone()], &ctx)
        .await
        .unwrap();
    let state = read(&variable);
    assert!(state.predictions.is_empty());
    assert_eq!(state.examples.len(), 3);
    assert_eq!(state.hints, vec!["Answer briefly".to_string()]);
}

#[tokio::test]
async fn test_k_larger_than_k_best_keeps_the_best() {
    let optimizer = RandomFewShot::with_seed(8, 4, 3).unwrap();
    let variable = state_variable("wide_k_state", &rewarded_state(12));
    optimizer
        .apply_optimization(&[variable.clone()], 0.0, &CallContext::new())
        .await
        .unwrap();
    let mut rewards: Vec<f64> = read(&variable)
        .examples
        .iter()
        .map(|e| e.reward.unwrap())
        .collect();
    rewards.sort_by(|a, b| b.total_cmp(a));
    assert_eq!(rewards, vec![11.0 / 12.0, 10.0 / 12.0, 9.0 / 12.0, 8.0 / 12.0]);
}

#[tokio::test]
async fn test_unrewarded_predictions_take_the_batch_reward() {
    let optimizer = RandomFewShot::with_seed(2, 10, 5).unwrap();
    let mut state = rewarded_state(0);
    state.predictions.push(Prediction {
        inputs: json!({"query": "fresh"}),
        outputs: json!({"answer": "new"}),
        reward: None,
    });
    let variable = state_variable("fresh_state", &state);
    optimizer
        .apply_optimization(&[variable.clone()], 0.75, &CallContext::new())
        .await
        .unwrap();
    let state = read(&variable);
    assert_eq!(state.predictions[0].reward, Some(0.75));
    assert_eq!(state.examples, state.predictions);
}

#[tokio::test]
async fn test_only_governed_variables_are_rewritten() {
    let optimizer = RandomFewShot::with_seed(1, 1, 0).unwrap();
    let ctx = CallContext::new();
    let unrelated = Variable::builder("unrelated_counter")
        .schema(xlinks::Schema::new().field("count", xlinks::FieldType::Integer))
        .value(json!({"count": 1}))
        .build(&ctx)
        .unwrap();
    let governed = state_variable("governed_state", &rewarded_state(2));
    assert!(xlinks::schema::contains(governed.schema(), &few_shot_schema()));

    optimizer
        .apply_optimization(&[unrelated.clone(), governed.clone()], 1.0, &ctx)
        .await
        .unwrap();
    assert_eq!(unrelated.payload().unwrap(), json!({"count": 1}));
    assert_eq!(read(&governed).examples.len(), 1);
}
