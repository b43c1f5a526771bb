use std::collections::HashMap;
use std::time::Duration;

use wiremock::ResponseTemplate;

use crate::core::config::Settings;
use crate::services::ai_grading::GradeOptions;

/// Settings pointing at a mock completion endpoint. `extra` overrides or adds variables.
pub(crate) fn settings(base_url: &str, extra: &[(&str, &str)]) -> Settings {
    let mut vars: HashMap<String, String> = [
        ("OPENAI_API_KEY", "test-key"),
        ("OPENAI_BASE_URL", base_url),
        ("AI_MODEL", "test-model"),
        ("AI_TEMPERATURE", "0.0"),
        ("AI_REQUEST_TIMEOUT", "5"),
        ("PROMETHEUS_ENABLED", "false"),
    ]
    .iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect();
    vars.extend(extra.iter().map(|(key, value)| (key.to_string(), value.to_string())));

    Settings::from_source(move |key: &str| vars.get(key).cloned()).expect("test settings")
}

/// A chat-completion envelope whose single message carries `content`.
pub(crate) fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
}

pub(crate) fn fast_options(max_retries: u32) -> GradeOptions {
    GradeOptions {
        max_retries,
        retry_delay: Duration::from_millis(10),
        use_cache: true,
        cache_parse_failures: true,
    }
}
