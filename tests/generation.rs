mod common;

use common::EchoGenerator;
use futures_util::StreamExt;
use taskweave::generation::{GenerationError, TextGenerator};

#[tokio::test]
async fn default_streaming_wraps_the_whole_response_as_one_chunk() {
    let generator = EchoGenerator::new("gen");

    let mut stream = generator.generate_stream("prompt").await.unwrap();
    let first = stream.next().await.expect("one chunk").unwrap();
    assert_eq!(first, "gen:prompt");
    assert!(stream.next().await.is_none());
}

#[test]
fn provider_errors_name_the_provider() {
    let err = GenerationError::provider("ollama", "connection refused");
    let rendered = err.to_string();
    assert!(rendered.contains("ollama"));
    assert!(rendered.contains("connection refused"));
}
