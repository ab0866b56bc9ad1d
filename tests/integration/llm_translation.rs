//! Language-model translation over HTTP, end to end through the facade

use crate::integration::support::{count_result, MockHttpServer, ScriptedAdapter};
use serde_json::json;
use skyroute::agent::QueryAgent;
use skyroute::credentials::Secret;
use skyroute::error::{AgentError, TranslationError};
use skyroute::outcome::OverallStatus;
use skyroute::provider::{ModelProvider, ProviderFactory};
use skyroute::telemetry::ServiceConfig;
use skyroute::translator::{BackendDialect, LlmTranslator};
use skyroute::types::QueryRequest;
use std::sync::Arc;

fn completion(content: &str) -> String {
    json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160}
    })
    .to_string()
}

fn dialects() -> Vec<BackendDialect> {
    vec![
        BackendDialect::new("relational", "PostgreSQL"),
        BackendDialect::new("warehouse", "BigQuery Standard SQL"),
    ]
}

#[tokio::test]
async fn azure_translation_drives_both_backends() {
    let server = MockHttpServer::start(vec![(
        200,
        completion(
            "```json\n{\"relational\": \"SELECT COUNT(*) FROM orders\", \"warehouse\": \"SELECT COUNT(*) FROM `sales.orders`\"}\n```",
        ),
    )])
    .await;
    let client = ProviderFactory::create_client(&ModelProvider::AzureOpenAI {
        endpoint: server.endpoint.clone(),
        deployment: "sql-writer".to_string(),
        api_key: Secret::new("azure-key"),
        api_version: None,
    })
    .unwrap();

    let relational = Arc::new(ScriptedAdapter::ok("postgres", count_result(42)));
    let warehouse = Arc::new(ScriptedAdapter::ok("bigquery", count_result(42)));
    let agent = QueryAgent::builder(ServiceConfig::default())
        .translator(Arc::new(LlmTranslator::new(Arc::from(client), dialects())))
        .adapter("relational", relational.clone())
        .adapter("warehouse", warehouse.clone())
        .build()
        .unwrap();

    let result = agent
        .execute_query(QueryRequest::new("How many orders do we have?"))
        .await
        .unwrap();

    assert_eq!(result.status(), OverallStatus::Success);
    assert_eq!(relational.queries(), vec!["SELECT COUNT(*) FROM orders"]);
    assert_eq!(warehouse.queries(), vec!["SELECT COUNT(*) FROM `sales.orders`"]);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .path
        .starts_with("/openai/deployments/sql-writer/chat/completions?api-version="));
    assert_eq!(requests[0].header("api-key"), Some("azure-key"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["messages"][1]["content"], json!("How many orders do we have?"));
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("BigQuery Standard SQL"));
}

#[tokio::test]
async fn openai_translation_with_no_applicable_backend_is_an_empty_plan() {
    let server = MockHttpServer::start(vec![(200, completion("{}"))]).await;
    let client = ProviderFactory::create_client(&ModelProvider::OpenAI {
        model: "gpt-4o-mini".to_string(),
        api_key: Secret::new("sk-test"),
        base_url: Some(server.endpoint.clone()),
    })
    .unwrap();

    let adapter = Arc::new(ScriptedAdapter::ok("postgres", count_result(1)));
    let agent = QueryAgent::builder(ServiceConfig::default())
        .translator(Arc::new(LlmTranslator::new(Arc::from(client), dialects())))
        .adapter("relational", adapter.clone())
        .adapter("warehouse", Arc::new(ScriptedAdapter::ok("bigquery", count_result(1))))
        .build()
        .unwrap();

    let err = agent
        .execute_query(QueryRequest::new("What is the meaning of life?"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Translation(TranslationError::EmptyPlan)));
    assert_eq!(adapter.calls(), 0);

    let requests = server.requests();
    assert_eq!(requests[0].path, "/chat/completions");
    assert_eq!(requests[0].header("authorization"), Some("Bearer sk-test"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["model"], json!("gpt-4o-mini"));
    assert_eq!(body["response_format"]["type"], json!("json_object"));
}

#[tokio::test]
async fn provider_auth_failure_is_a_translation_error() {
    let server = MockHttpServer::start(vec![(
        401,
        json!({"error": {"message": "Incorrect API key provided"}}).to_string(),
    )])
    .await;
    let client = ProviderFactory::create_client(&ModelProvider::OpenAI {
        model: "gpt-4o-mini".to_string(),
        api_key: Secret::new("sk-wrong"),
        base_url: Some(server.endpoint.clone()),
    })
    .unwrap();

    let adapter = Arc::new(ScriptedAdapter::ok("postgres", count_result(1)));
    let agent = QueryAgent::builder(ServiceConfig::default())
        .translator(Arc::new(LlmTranslator::new(Arc::from(client), dialects())))
        .adapter("relational", adapter.clone())
        .build()
        .unwrap();

    let err = agent
        .execute_query(QueryRequest::new("count orders"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Translation(TranslationError::Provider(_))));
    assert_eq!(adapter.calls(), 0);
}
