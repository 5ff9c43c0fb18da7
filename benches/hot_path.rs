use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use protobridge::protocol::canonical::{
    FunctionCall, FunctionDeclaration, FunctionResponse, GenerationOptions, ToolGroup, Turn,
    TurnPart, TurnRole, WireRequestPlan,
};
use protobridge::protocol::normalize::normalize_conversation;
use protobridge::protocol::openai_chat::encoder::encode_chat_request_bytes;
use protobridge::protocol::openai_responses::encoder::encode_responses_request_bytes;
use protobridge::stream::{ChatDeltaAccumulator, EventFolder, FragmentQueue, SseParser};

fn tool_heavy_history(exchanges: usize) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(exchanges * 3);
    for idx in 0..exchanges {
        let id = format!("call_{idx}");
        turns.push(Turn::text(TurnRole::User, format!("open file {idx}")));
        turns.push(Turn::new(
            TurnRole::Assistant,
            vec![
                TurnPart::Text("reading it".to_string()),
                TurnPart::FunctionCall(FunctionCall {
                    id: Some(id.clone()),
                    name: "read_file".to_string(),
                    args: json!({"path": format!("src/file_{idx}.rs")}),
                }),
            ],
        ));
        // Every fourth result arrives without an id and is matched by name.
        let result_id = (idx % 4 != 0).then_some(id);
        turns.push(Turn::new(
            TurnRole::Tool,
            vec![TurnPart::FunctionResponse(FunctionResponse {
                id: result_id,
                name: Some("read_file".to_string()),
                response: json!({"content": "fn main() {}\n".repeat(8)}),
            })],
        ));
    }
    turns
}

fn tools() -> Vec<ToolGroup> {
    vec![ToolGroup {
        function_declarations: vec![FunctionDeclaration {
            name: "read_file".to_string(),
            description: Some("Read a file".to_string()),
            parameters_json_schema: Some(json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            })),
        }],
    }]
}

fn chat_stream_body(text_chunks: usize) -> Vec<u8> {
    let mut body = String::new();
    for idx in 0..text_chunks {
        let chunk = json!({
            "choices": [{"index": 0, "delta": {"content": format!("token{idx} ")}}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    for piece in ["{\"pa", "th\":\"sr", "c/main.rs\"}"] {
        let chunk = json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "function": {"name": "read_file", "arguments": piece}
            }]}}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn bench_normalize(c: &mut Criterion) {
    let short = tool_heavy_history(4);
    let long = tool_heavy_history(64);

    c.bench_function("normalize_tool_history_4", |b| {
        b.iter(|| black_box(normalize_conversation(black_box(&short), Some("be brief"))));
    });
    c.bench_function("normalize_tool_history_64", |b| {
        b.iter(|| black_box(normalize_conversation(black_box(&long), Some("be brief"))));
    });
}

fn bench_encode(c: &mut Criterion) {
    let messages = normalize_conversation(&tool_heavy_history(16), Some("be brief"));
    let tools = tools();
    let options = GenerationOptions::default();
    let plan = WireRequestPlan {
        model: "gpt-bench",
        messages: &messages,
        tools: &tools,
        options: &options,
        forced_tool: Some("read_file"),
        stream: true,
    };

    c.bench_function("encode_chat_request_16", |b| {
        b.iter(|| black_box(encode_chat_request_bytes(black_box(&plan))));
    });
    c.bench_function("encode_responses_request_16", |b| {
        b.iter(|| black_box(encode_responses_request_bytes(black_box(&plan))));
    });
}

fn fold_chat_body(body: &[u8], split: usize) -> usize {
    let mut parser = SseParser::new();
    let mut accumulator = ChatDeltaAccumulator::new();
    let mut events: Vec<Value> = Vec::new();
    let mut out = FragmentQueue::new();
    for piece in body.chunks(split) {
        parser.feed_into(piece, &mut events);
        for event in events.drain(..) {
            let _ = accumulator.fold(event, &mut out);
        }
    }
    parser.finish_into(&mut events);
    for event in events.drain(..) {
        let _ = accumulator.fold(event, &mut out);
    }
    accumulator.finish(&mut out);
    out.len()
}

fn bench_chat_stream(c: &mut Criterion) {
    let body = chat_stream_body(256);

    c.bench_function("chat_stream_fold_256_whole", |b| {
        b.iter(|| black_box(fold_chat_body(black_box(&body), body.len())));
    });
    c.bench_function("chat_stream_fold_256_split_17", |b| {
        b.iter(|| black_box(fold_chat_body(black_box(&body), 17)));
    });
}

criterion_group!(benches, bench_normalize, bench_encode, bench_chat_stream);
criterion_main!(benches);
