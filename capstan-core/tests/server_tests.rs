//! End-to-end tests for the MCP server
//!
//! These drive raw JSON-RPC text through the server the way a transport
//! would, covering batching, visibility, namespacing and sessions.

use capstan_core::mcp::codes;
use capstan_core::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

fn registry() -> DeclarationRegistry {
    let mut registry = DeclarationRegistry::new();
    registry
        .register(
            ToolDeclaration::new("add", "Add two numbers")
                .param("a", ParameterSpec::number())
                .param("b", ParameterSpec::number().with_default(json!(0)))
                .read_only()
                .handler_fn(|args, _ctx| async move {
                    let a = args["a"].as_f64().unwrap_or_default();
                    let b = args["b"].as_f64().unwrap_or_default();
                    Ok::<_, HandlerError>(json!(a + b))
                }),
        )
        .unwrap();
    registry
        .register(
            ToolDeclaration::new("sleep", "Sleep for a number of milliseconds")
                .param("ms", ParameterSpec::integer().minimum(0.0))
                .handler_fn(|args, _ctx| async move {
                    let ms = args["ms"].as_u64().unwrap_or_default();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, HandlerError>(json!({"slept": ms}))
                }),
        )
        .unwrap();
    registry
        .register(
            ToolDeclaration::new("fail", "Always fails")
                .handler_fn(|_args, _ctx| async move { Err::<Value, _>(HandlerError::new("boom")) }),
        )
        .unwrap();
    registry
        .register(
            ToolDeclaration::new("purge", "Delete everything")
                .hidden(Hidden::unless_permitted("admin"))
                .destructive()
                .handler_fn(|_args, ctx| async move {
                    Ok::<_, HandlerError>(json!({"purged_by": ctx.session_id}))
                }),
        )
        .unwrap();
    registry
        .register(
            ToolDeclaration::new("multiply", "Multiply two numbers")
                .param("a", ParameterSpec::number())
                .param("b", ParameterSpec::number())
                .handler_fn(|args, _ctx| async move {
                    let a = args["a"].as_f64().unwrap_or_default();
                    let b = args["b"].as_f64().unwrap_or_default();
                    Ok::<_, HandlerError>(json!(a * b))
                }),
        )
        .unwrap();
    registry
        .register(RouterDeclaration::new("math", "Arithmetic beyond addition").member("multiply"))
        .unwrap();
    registry
        .register(
            ToolDeclaration::new("reset", "Reset the service")
                .destructive()
                .handler_fn(|_args, _ctx| async move { Ok::<_, HandlerError>(json!("reset")) }),
        )
        .unwrap();
    registry
        .register(
            RouterDeclaration::new("ops", "Operator actions")
                .member("reset")
                .hidden(Hidden::unless_permitted("admin")),
        )
        .unwrap();
    registry
        .register(
            PromptDeclaration::new("greet", "Greet someone")
                .param("who", ParameterSpec::string())
                .template("Hello {{who}}"),
        )
        .unwrap();
    registry
        .register(ResourceDeclaration::new("motd", "Message of the day").literal(json!("Be kind")))
        .unwrap();
    registry
        .register(
            SkillDeclaration::new("arith", "Doing arithmetic")
                .members(["add", "multiply", "greet"])
                .instructions("Prefer `add` for sums."),
        )
        .unwrap();
    registry
        .register(
            SkillDeclaration::new("ops_guide", "Operating the service")
                .members(["reset"])
                .hidden(Hidden::unless_permitted("admin")),
        )
        .unwrap();
    registry
}

fn server_with(config: CapstanConfig) -> McpServer {
    McpServer::builder().config(config).registry(registry()).build().unwrap()
}

fn server() -> McpServer {
    server_with(CapstanConfig::default())
}

fn call(id: i64, tool: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": tool, "arguments": arguments}
    })
}

fn request(id: i64, method: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method})
}

fn names(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_tools_list_respects_grouping_and_visibility() {
    let server = server();
    let response = server.handle_message(&request(1, "tools/list").to_string()).await.unwrap();
    let tools = names(&response["result"]["tools"]);

    assert!(tools.contains(&"add".to_string()));
    assert!(tools.contains(&"math".to_string()));
    // grouped under a router, hidden without permission
    assert!(!tools.contains(&"multiply".to_string()));
    assert!(!tools.contains(&"purge".to_string()));
}

#[tokio::test]
async fn test_call_with_coercion_and_defaults() {
    let server = server();
    let response = server
        .handle_message(&call(1, "add", json!({"a": "2.5"})).to_string())
        .await
        .unwrap();
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["content"][0]["text"], "2.5");
}

#[tokio::test]
async fn test_validation_error_reports_issues() {
    let server = server();
    let response = server
        .handle_message(&call(3, "add", json!({"a": "two"})).to_string())
        .await
        .unwrap();
    let error = &response["error"];
    assert_eq!(error["code"], codes::INVALID_PARAMS);
    assert_eq!(error["data"]["type"], "validation_error");
    assert_eq!(error["data"]["issues"][0]["path"], "a");
}

#[tokio::test]
async fn test_router_member_called_through_namespace() {
    let server = server();

    let opened = server.handle_message(&call(1, "math", json!({})).to_string()).await.unwrap();
    let members = &opened["result"]["structuredContent"]["tools"];
    assert_eq!(names(members), vec!["math__multiply".to_string()]);

    let response = server
        .handle_message(&call(2, "math__multiply", json!({"a": 3, "b": 4})).to_string())
        .await
        .unwrap();
    assert_eq!(response["result"]["content"][0]["text"], "12.0");

    let response = server
        .handle_message(&call(3, "multiply", json!({"a": 3, "b": 4})).to_string())
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn test_batch_preserves_order_and_isolates_failures() {
    let server = server();
    let batch = json!([
        call(1, "sleep", json!({"ms": 30})),
        call(2, "fail", json!({})),
        {"jsonrpc": "2.0", "method": "notifications/progress"},
        call(3, "add", json!({"a": 1, "b": 2})),
        request(4, "no/such/method"),
    ]);

    let response = server.handle_message(&batch.to_string()).await.unwrap();
    let entries = response.as_array().unwrap();
    assert_eq!(entries.len(), 4);

    let ids: Vec<i64> = entries.iter().map(|e| e["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    assert_eq!(entries[0]["result"]["structuredContent"]["slept"], 30);
    assert_eq!(entries[1]["error"]["code"], codes::HANDLER_EXECUTION);
    assert_eq!(entries[1]["error"]["data"]["name"], "fail");
    assert_eq!(entries[2]["result"]["content"][0]["text"], "3.0");
    assert_eq!(entries[3]["error"]["code"], codes::METHOD_NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_batch_deadline_times_out_slow_items() {
    let mut config = CapstanConfig::default();
    config.batch.timeout = Duration::from_secs(1);
    let server = server_with(config);

    let batch = json!([
        call(1, "sleep", json!({"ms": 10})),
        call(2, "sleep", json!({"ms": 5000})),
        call(3, "add", json!({"a": 1})),
    ]);

    let response = server.handle_message(&batch.to_string()).await.unwrap();
    let entries = response.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].get("result").is_some());
    assert_eq!(entries[1]["error"]["code"], codes::BATCH_TIMEOUT);
    assert_eq!(entries[1]["error"]["data"]["timeoutMs"], 1000);
    assert!(entries[2].get("result").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_sequential_batch_mode() {
    let mut config = CapstanConfig::default();
    config.batch.mode = BatchMode::Sequential;
    config.batch.timeout = Duration::from_millis(150);
    let server = server_with(config);

    let batch = json!([
        call(1, "sleep", json!({"ms": 100})),
        call(2, "sleep", json!({"ms": 100})),
        call(3, "sleep", json!({"ms": 100})),
    ]);

    let response = server.handle_message(&batch.to_string()).await.unwrap();
    let entries = response.as_array().unwrap();
    assert!(entries[0].get("result").is_some());
    assert_eq!(entries[1]["error"]["data"]["type"], "batch_timeout");
    assert_eq!(entries[2]["error"]["data"]["type"], "batch_timeout");
}

#[tokio::test]
async fn test_batch_framing_errors() {
    let mut config = CapstanConfig::default();
    config.batch.max_items = 2;
    let server = server_with(config);

    let response = server.handle_message("[]").await.unwrap();
    assert_eq!(response["error"]["code"], codes::INVALID_REQUEST);

    let too_many = json!([request(1, "ping"), request(2, "ping"), request(3, "ping")]);
    let response = server.handle_message(&too_many.to_string()).await.unwrap();
    assert_eq!(response["error"]["code"], codes::BATCH_SIZE_EXCEEDED);
    assert_eq!(response["error"]["data"]["max"], 2);

    let only_notifications = json!([{"jsonrpc": "2.0", "method": "notifications/initialized"}]);
    assert!(server.handle_message(&only_notifications.to_string()).await.is_none());
    assert!(server.is_initialized());

    let mixed = json!([request(1, "ping"), 42]);
    let response = server.handle_message(&mixed.to_string()).await.unwrap();
    let entries = response.as_array().unwrap();
    assert_eq!(entries[0]["result"], json!({}));
    assert_eq!(entries[1]["id"], Value::Null);
    assert_eq!(entries[1]["error"]["code"], codes::INVALID_REQUEST);
}

#[tokio::test]
async fn test_prompts_resources_and_skills() {
    let server = server();

    let response = server
        .handle_message(
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "prompts/get",
                "params": {"name": "greet", "arguments": {"who": "Ada"}}
            })
            .to_string(),
        )
        .await
        .unwrap();
    assert_eq!(response["result"]["messages"][0]["content"]["text"], "Hello Ada");

    let response = server.handle_message(&request(2, "resources/list").to_string()).await.unwrap();
    let uris: Vec<&str> = response["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap())
        .collect();
    assert_eq!(uris, vec!["resource://motd", "skill://arith"]);

    let read = |id: i64, uri: &str| {
        json!({"jsonrpc": "2.0", "id": id, "method": "resources/read", "params": {"uri": uri}}).to_string()
    };

    let response = server.handle_message(&read(3, "resource://motd")).await.unwrap();
    assert_eq!(response["result"]["contents"][0]["text"], "Be kind");

    let response = server.handle_message(&read(4, "skill://arith")).await.unwrap();
    let contents = &response["result"]["contents"][0];
    assert_eq!(contents["mimeType"], "text/markdown");
    let document = contents["text"].as_str().unwrap();
    assert!(document.contains("Prefer `add` for sums."));
    assert!(document.contains("multiply"));
}

#[tokio::test]
async fn test_session_permissions_reveal_hidden_tools() {
    let server = server();
    let store = server.sessions().unwrap();
    let admin = store.create(&RequestContext::new().with_permission("admin"));

    let list = request(1, "tools/list").to_string();
    let response = server.handle_session_message(&admin, &list).await.unwrap();
    assert!(names(&response["result"]["tools"]).contains(&"purge".to_string()));

    let response = server
        .handle_session_message(&admin, &call(2, "purge", json!({})).to_string())
        .await
        .unwrap();
    assert_eq!(response["result"]["structuredContent"]["purged_by"], json!(admin));
}

#[tokio::test]
async fn test_hidden_calls_denied_by_policy() {
    let mut config = CapstanConfig::default();
    config.visibility.hidden_call_policy = HiddenCallPolicy::Deny;
    let server = server_with(config);

    let response = server.handle_message(&call(1, "purge", json!({})).to_string()).await.unwrap();
    assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);

    // a hidden router hides its members, and a hidden skill its document
    let response = server.handle_message(&call(2, "ops", json!({})).to_string()).await.unwrap();
    assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);
    let response = server.handle_message(&call(3, "ops__reset", json!({})).to_string()).await.unwrap();
    assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);
    let read = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "resources/read",
        "params": {"uri": "skill://ops_guide"}
    })
    .to_string();
    let response = server.handle_message(&read).await.unwrap();
    assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);

    // a visible router still routes to its members
    let response = server
        .handle_message(&call(5, "math__multiply", json!({"a": 2, "b": 3})).to_string())
        .await
        .unwrap();
    assert_eq!(response["result"]["content"][0]["text"], "6.0");

    let store = server.sessions().unwrap();
    let admin = store.create(&RequestContext::new().with_permission("admin"));
    let response = server
        .handle_session_message(&admin, &call(6, "ops__reset", json!({})).to_string())
        .await
        .unwrap();
    assert_eq!(response["result"]["content"][0]["text"], "reset");
    let response = server.handle_session_message(&admin, &read).await.unwrap();
    assert_eq!(response["result"]["contents"][0]["uri"], "skill://ops_guide");
}

#[tokio::test(start_paused = true)]
async fn test_session_lifecycle() {
    let mut config = CapstanConfig::default();
    config.sessions.idle_timeout = Duration::from_secs(60);
    let server = server_with(config);

    let init = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "it", "version": "0.0.1"}
        }
    });
    let response = server.handle_message(&init.to_string()).await.unwrap();
    let session = response["result"]["_meta"]["sessionId"].as_str().unwrap().to_string();

    // activity keeps the session alive
    for id in 2..5 {
        tokio::time::advance(Duration::from_secs(45)).await;
        let response = server
            .handle_session_message(&session, &request(id, "ping").to_string())
            .await
            .unwrap();
        assert_eq!(response["result"], json!({}));
    }

    tokio::time::advance(Duration::from_secs(61)).await;
    let response = server
        .handle_session_message(&session, &request(9, "ping").to_string())
        .await
        .unwrap();
    assert_eq!(response["id"], 9);
    assert_eq!(response["error"]["code"], codes::SESSION_NOT_FOUND);
    assert_eq!(response["error"]["data"]["sessionId"], json!(session));
}

#[tokio::test]
async fn test_terminate_session() {
    let server = server();
    let session = server.sessions().unwrap().create(&RequestContext::new());

    let response = server
        .handle_session_message(&session, &request(1, "session/terminate").to_string())
        .await
        .unwrap();
    assert_eq!(response["result"], json!({}));

    let response = server
        .handle_session_message(&session, &request(2, "tools/list").to_string())
        .await
        .unwrap();
    assert_eq!(response["error"]["data"]["type"], "session_not_found");

    let batched = json!([request(3, "session/terminate")]);
    let response = server.handle_message(&batched.to_string()).await.unwrap();
    assert_eq!(response[0]["error"]["code"], codes::INVALID_REQUEST);
}

#[tokio::test]
async fn test_terminate_only_ends_the_attached_session() {
    let server = server();
    let store = server.sessions().unwrap();
    let mine = store.create(&RequestContext::new());
    let theirs = store.create(&RequestContext::new());

    let terminate = |id: i64, target: &str| {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "session/terminate",
            "params": {"sessionId": target}
        })
        .to_string()
    };

    let response = server.handle_session_message(&mine, &terminate(1, &theirs)).await.unwrap();
    assert_eq!(response["error"]["code"], codes::INVALID_PARAMS);
    let response = server
        .handle_session_message(&theirs, &request(2, "ping").to_string())
        .await
        .unwrap();
    assert_eq!(response["result"], json!({}));

    // naming the attached session is the same as naming none
    let response = server.handle_session_message(&mine, &terminate(3, &mine)).await.unwrap();
    assert_eq!(response["result"], json!({}));

    // without an attached session the params name the target
    let response = server.handle_message(&terminate(4, &theirs)).await.unwrap();
    assert_eq!(response["result"], json!({}));
    let response = server
        .handle_session_message(&theirs, &request(5, "ping").to_string())
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], codes::SESSION_NOT_FOUND);

    let response = server.handle_message(&request(6, "session/terminate").to_string()).await.unwrap();
    assert_eq!(response["error"]["code"], codes::INVALID_PARAMS);
}
