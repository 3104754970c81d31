//! Client -> relay -> OpenAI-compatible upstream, all over real sockets.

mod common;

use chat_relay::backend::create_backend;
use chat_relay::config::Config;
use chat_relay::error::ClientError;
use chat_relay::client::StreamChatClient;
use chat_relay::message::{ChatMessage, StreamChatRequest};

use common::{spawn_relay, test_config, test_state, FakeUpstream, UpstreamReply};

fn openai_config(upstream: &FakeUpstream) -> Config {
    let mut config = test_config();
    config.backend.provider = "openai".to_string();
    config.backend.timeout_secs = 5;
    config.backend.openai.api_key = Some("test-key".to_string());
    config.backend.openai.api_base = upstream.api_base();
    config
}

async fn relay_client(config: &Config) -> StreamChatClient {
    let backend = create_backend(&config.backend).unwrap();
    let addr = spawn_relay(test_state(config, backend)).await;
    StreamChatClient::new(&format!("http://{}", addr))
}

#[tokio::test]
async fn test_upstream_reply_reaches_client() {
    let upstream = FakeUpstream::spawn(UpstreamReply::Chunks(vec!["Hello", " there", "!"])).await;
    let client = relay_client(&openai_config(&upstream)).await;

    let request = StreamChatRequest::new(vec![
        ChatMessage::user("Hi"),
        ChatMessage::assistant("Hello, how can I help?"),
        ChatMessage::user("Say hello"),
    ]);
    let reply = client.collect(request).await.unwrap();

    assert_eq!(reply, "Hello there!");

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    let body = &requests[0];
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    assert_eq!(body["messages"][2]["role"], "user");
    assert_eq!(body["messages"][2]["content"], "Say hello");
}

#[tokio::test]
async fn test_flow_and_model_reach_upstream() {
    let upstream = FakeUpstream::spawn(UpstreamReply::Chunks(vec!["ok"])).await;
    let client = relay_client(&openai_config(&upstream)).await;

    let request = StreamChatRequest::new(vec![ChatMessage::user("Pricing?")])
        .with_model("gpt-4o-mini")
        .with_flow("restaurant_advisor");
    assert_eq!(client.collect(request).await.unwrap(), "ok");

    let body = &upstream.requests()[0];
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "You advise restaurant owners.");
    assert_eq!(body["messages"][1]["content"], "Pricing?");
}

#[tokio::test]
async fn test_upstream_rejection_surfaces_as_status_error() {
    let upstream = FakeUpstream::spawn(UpstreamReply::Status(401)).await;
    let client = relay_client(&openai_config(&upstream)).await;

    let err = client
        .collect(StreamChatRequest::new(vec![ChatMessage::user("Hi")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Status { status: 500 }));
}

#[tokio::test]
async fn test_unknown_flow_never_reaches_upstream() {
    let upstream = FakeUpstream::spawn(UpstreamReply::Chunks(vec!["never"])).await;
    let client = relay_client(&openai_config(&upstream)).await;

    let reply = client
        .collect(StreamChatRequest::new(vec![ChatMessage::user("Hi")]).with_flow("missing"))
        .await
        .unwrap();

    assert_eq!(reply, "Error: Flow not found");
    assert!(upstream.requests().is_empty());
}
