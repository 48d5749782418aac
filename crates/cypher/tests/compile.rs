use cypher::{CompileOptions, CompileStrategy, check_syntax, compile_query_script};
use extract::testing::ScriptedEngine;
use extract::{CompletionEngine, Entity, EntityType, RawGraph, Relationship, SamplingOptions};

fn single_entity_graph() -> RawGraph {
    RawGraph {
        entities: vec![Entity::new("e1", "Acme", EntityType::Organization).with_importance(0.7)],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_prose_response_falls_back_to_deterministic() {
    let engine = ScriptedEngine::replying("I am sorry, I cannot help with graph databases today.");

    let compiled = compile_query_script(&single_entity_graph(), &engine, &CompileOptions::default())
        .await
        .unwrap();

    assert_eq!(compiled.strategy, CompileStrategy::Deterministic);
    assert_eq!(engine.calls(), 1);
    assert!(compiled.script.contains("CREATE CONSTRAINT organization_id_unique"));
    assert!(compiled.script.contains("MERGE (n:Organization {id: 'e1'})"));
    assert!(compiled.script.contains("CREATE INDEX organization_label_index"));
    assert_eq!(check_syntax(&compiled.script), Ok(()));
}

#[tokio::test]
async fn test_model_script_accepted() {
    let engine = ScriptedEngine::replying(
        "```cypher\nMERGE (n:Organization {id: 'e1'}) SET n.label = 'Acme';\n```",
    );

    let compiled = compile_query_script(&single_entity_graph(), &engine, &CompileOptions::default())
        .await
        .unwrap();

    assert_eq!(compiled.strategy, CompileStrategy::ModelAssisted);
    assert_eq!(compiled.script, "MERGE (n:Organization {id: 'e1'}) SET n.label = 'Acme';");

    let prompt = &engine.prompts()[0];
    assert!(prompt.contains("\"label\": \"Acme\""));
    assert!(!engine.sampling()[0].json_output);
}

#[tokio::test]
async fn test_truncated_model_script_rejected() {
    let engine = ScriptedEngine::replying("MERGE (n:Organization {id: 'e1'}) SET n.label = 'Ac");

    let compiled = compile_query_script(&single_entity_graph(), &engine, &CompileOptions::default())
        .await
        .unwrap();

    assert_eq!(compiled.strategy, CompileStrategy::Deterministic);
}

#[tokio::test]
async fn test_engine_failure_falls_back() {
    let engine = ScriptedEngine::new().then_fail("runtime crashed");

    let compiled = compile_query_script(&single_entity_graph(), &engine, &CompileOptions::default())
        .await
        .unwrap();

    assert_eq!(compiled.strategy, CompileStrategy::Deterministic);
}

#[tokio::test]
async fn test_deterministic_only_skips_engine() {
    let engine = ScriptedEngine::replying("MERGE (n) RETURN n");
    let options = CompileOptions {
        use_model: false,
        ..CompileOptions::default()
    };

    let compiled = compile_query_script(&single_entity_graph(), &engine, &options).await.unwrap();

    assert_eq!(compiled.strategy, CompileStrategy::Deterministic);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_model_call_keeps_engine_sampling_defaults() {
    let defaults = SamplingOptions {
        repeat_penalty: 1.4,
        stop: vec![";;".to_string()],
        ..SamplingOptions::default()
    };
    let engine = ScriptedEngine::replying("MERGE (n:Person {id: 'p'}) RETURN n;").with_sampling_defaults(defaults);
    let options = CompileOptions {
        max_tokens: 1024,
        ..CompileOptions::default()
    };

    compile_query_script(&single_entity_graph(), &engine, &options).await.unwrap();

    let sampling = &engine.sampling()[0];
    assert_eq!(sampling.repeat_penalty, 1.4);
    assert_eq!(sampling.stop, vec![";;".to_string()]);
    assert_eq!(sampling.max_tokens, 1024);
    assert!(!sampling.json_output);
}

#[tokio::test]
async fn test_dangling_relationships_not_sent_or_compiled() {
    let graph = RawGraph {
        entities: vec![
            Entity::new("p", "Ada", EntityType::Person),
            Entity::new("o", "Acme", EntityType::Organization),
        ],
        relationships: vec![
            Relationship::new("r1", "p", "o", "founded"),
            Relationship::new("r2", "p", "nobody", "knows"),
        ],
        ..Default::default()
    };
    let engine = ScriptedEngine::replying("no script");

    let compiled = compile_query_script(&graph, &engine, &CompileOptions::default()).await.unwrap();

    assert!(!engine.prompts()[0].contains("nobody"));
    assert!(compiled.script.contains("MERGE (a)-[r:FOUNDED]->(b)"));
    assert!(!compiled.script.contains("nobody"));
    assert!(engine.is_available());
}
