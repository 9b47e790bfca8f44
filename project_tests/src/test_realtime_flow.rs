//! Manual end-to-end runner for the realtime subscription flow.
//!
//! Walks the whole path once: WebSocket handshake, subscription start, an
//! HTTP mutation, the pushed data frame, and the stop/complete exchange.
//! Point it at a running server with `--url`, or let it start an embedded
//! simulator when no url is given.

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use lib_simulator::{resolver, Simulator, SimulatorConfig, SimulatorSchema};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// GraphQL endpoint of a running simulator, e.g. http://192.168.1.10:8900/graphql.
    /// When omitted an embedded simulator is started for the run.
    #[clap(long)]
    url: Option<String>,

    /// Api key to present in the connection_init payload
    #[clap(long)]
    api_key: Option<String>,
}

fn embedded_schema() -> SimulatorSchema {
    SimulatorSchema::new()
        .mutation(
            "createTodo",
            resolver(|args| async move {
                let name = args.get("name").cloned().unwrap_or(Value::Null);
                Ok(json!({"id": "todo-1", "name": name}))
            }),
        )
        .subscription("onCreateTodo", &["createTodo"])
}

fn realtime_url(graphql_url: &str) -> String {
    let mut parsed = Url::parse(graphql_url).expect("invalid graphql url");
    let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
    parsed.set_scheme(scheme).expect("url scheme rejected");
    parsed.set_path("/graphql/realtime");
    parsed.to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut embedded = None;
    let graphql_url = match args.url {
        Some(url) => url,
        None => {
            let mut simulator = Simulator::new(embedded_schema(), SimulatorConfig::default());
            simulator.start().await.expect("embedded simulator failed to start");
            let url = simulator.url().expect("started simulator has a url").graphql.clone();
            println!("Started embedded simulator at {}", url);
            embedded = Some(simulator);
            url
        }
    };
    let realtime = realtime_url(&graphql_url);

    println!("Connecting to {}...", realtime);
    let (mut ws, _) = connect_async(&realtime).await.expect("Failed to connect");

    // 1. Handshake
    let init_payload = match &args.api_key {
        Some(key) => json!({"x-api-key": key}),
        None => json!({}),
    };
    ws.send(Message::Text(
        json!({"type": "connection_init", "payload": init_payload}).to_string().into(),
    ))
    .await
    .expect("Failed to send connection_init");

    let ack = next_frame(&mut ws).await;
    assert_eq!(ack["type"], "connection_ack", "handshake rejected: {ack}");
    println!(
        "Handshake ok, connectionTimeoutMs = {}",
        ack["payload"]["connectionTimeoutMs"]
    );

    // 2. Subscribe
    ws.send(Message::Text(
        json!({
            "type": "start",
            "id": "flow-1",
            "payload": {"query": "subscription { onCreateTodo { id name } }"}
        })
        .to_string()
        .into(),
    ))
    .await
    .expect("Failed to send start");
    let start_ack = next_frame(&mut ws).await;
    assert_eq!(start_ack["type"], "start_ack", "subscription rejected: {start_ack}");
    println!("Subscription flow-1 acknowledged");

    // 3. Mutate over HTTP
    let mutation_sent = Instant::now();
    let response: Value = reqwest::Client::new()
        .post(&graphql_url)
        .json(&json!({
            "query": "mutation { createTodo(name: \"realtime probe\") { id name } }"
        }))
        .send()
        .await
        .expect("mutation request failed")
        .json()
        .await
        .expect("mutation response was not json");
    println!("Mutation response: {}", response);

    // 4. Await the pushed payload
    let data = loop {
        let frame = next_frame(&mut ws).await;
        match frame["type"].as_str() {
            Some("ka") => continue,
            Some("data") => break frame,
            _ => panic!("unexpected frame while waiting for data: {frame}"),
        }
    };
    assert_eq!(data["id"], "flow-1");
    println!(
        "Data frame for flow-1 after {} ms: {}",
        mutation_sent.elapsed().as_millis(),
        data["payload"]
    );

    // 5. Stop
    ws.send(Message::Text(json!({"type": "stop", "id": "flow-1"}).to_string().into()))
        .await
        .expect("Failed to send stop");
    let complete = loop {
        let frame = next_frame(&mut ws).await;
        if frame["type"] != "ka" {
            break frame;
        }
    };
    assert_eq!(complete["type"], "complete");
    println!("Subscription flow-1 completed");

    if let Some(mut simulator) = embedded {
        simulator.stop();
    }
    println!("All steps passed.");
    Ok(())
}

async fn next_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    loop {
        let msg = ws
            .next()
            .await
            .expect("socket closed unexpectedly")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame was not json");
        }
    }
}
