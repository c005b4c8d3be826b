use serde_json::json;
use xlinks::{initialize_all_variables, CallContext, FieldType, Initializer, OpError, Schema, Variable};

fn hints() -> Schema {
    Schema::new().field("hints", FieldType::Array(Box::new(FieldType::String)))
}

fn deferred(ctx: &CallContext, name: &str) -> Variable {
    Variable::builder(name)
        .schema(hints())
        .initializer(Initializer::new(|_| json!({"hints": ["seeded"]})))
        .build(ctx)
        .unwrap()
}

// Single test: the pending list is process-wide.
#[test]
fn test_global_flush_runs_once_and_skips_dropped_variables() {
    let ctx = CallContext::new();
    let (kept, dropped) = {
        let _scope = ctx.stateless_scope();
        (deferred(&ctx, "kept"), deferred(&ctx, "dropped"))
    };
    drop(dropped);
    assert!(!kept.is_initialized());

    assert_eq!(initialize_all_variables(&ctx).unwrap(), 1);
    assert_eq!(kept.payload(), Some(json!({"hints": ["seeded"]})));

    // a second flush finds nothing left to do
    assert_eq!(initialize_all_variables(&ctx).unwrap(), 0);
    assert_eq!(kept.payload(), Some(json!({"hints": ["seeded"]})));
    assert!(matches!(
        kept.deferred_initialize(&ctx),
        Err(OpError::AlreadyInitialized(_))
    ));

    // flushing is refused inside a stateless scope
    let _scope = ctx.stateless_scope();
    assert!(matches!(
        initialize_all_variables(&ctx),
        Err(OpError::ScopeError(_))
    ));
}
