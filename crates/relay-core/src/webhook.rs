// Webhook tool dispatch.
//
// URL, headers, and body template accept `{{arg}}` placeholders substituted
// from the call's arguments. When no body template is configured the
// argument object itself is sent as the JSON body.

use relay_contracts::tools::WebhookTool;
use serde_json::Value;

use crate::error::{Error, Result};

const RESPONSE_CAP: usize = 4096;

pub async fn invoke(client: &reqwest::Client, tool: &WebhookTool, arguments: &Value) -> Result<String> {
    let url = substitute(&tool.url, arguments);
    let method = tool
        .method
        .parse::<reqwest::Method>()
        .map_err(|e| Error::tool(format!("invalid HTTP method {}: {e}", tool.method)))?;

    let body = build_body(tool, arguments);

    let mut request = client.request(method.clone(), &url);
    for (key, value) in &tool.headers {
        request = request.header(key, substitute(value, arguments));
    }

    request = match &body {
        Some(Value::Object(_)) | Some(Value::Array(_)) => request.json(&body),
        Some(value) => request.body(value.as_str().unwrap_or_default().to_string()),
        None if method == reqwest::Method::GET => request.query(arguments),
        None => request.json(arguments),
    };

    let response = request
        .timeout(std::time::Duration::from_secs(tool.timeout_secs))
        .send()
        .await
        .map_err(|e| Error::tool(format!("webhook request failed: {e}")))?;

    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !status.is_success() {
        return Err(Error::tool(format!("webhook returned HTTP {status}")));
    }

    let text = response
        .text()
        .await
        .map_err(|e| Error::tool(format!("failed to read webhook response: {e}")))?;

    let rendered = if content_type.contains("json") {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(text),
            Err(_) => text,
        }
    } else {
        text
    };

    Ok(cap(&rendered, RESPONSE_CAP))
}

fn build_body(tool: &WebhookTool, arguments: &Value) -> Option<Value> {
    match &tool.body_template {
        Some(template) => {
            let rendered = substitute_value(template, arguments);
            match &rendered {
                Value::String(s) => serde_json::from_str(s).ok().or(Some(rendered.clone())),
                _ => Some(rendered),
            }
        }
        None => Some(arguments.clone()),
    }
}

fn substitute_value(template: &Value, arguments: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(substitute(s, arguments)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, arguments)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, arguments)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute(template: &str, arguments: &Value) -> String {
    let Some(map) = arguments.as_object() else {
        return template.to_string();
    };
    let mut result = template.to_string();
    for (key, value) in map {
        let placeholder = format!("{{{{{key}}}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        result = result.replace(&placeholder, &replacement);
    }
    result
}

fn cap(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_replaces_string_and_non_string_args() {
        let args = serde_json::json!({"city": "Paris", "count": 3});
        assert_eq!(substitute("weather in {{city}}, {{count}} days", &args), "weather in Paris, 3 days");
    }

    #[test]
    fn test_build_body_defaults_to_arguments_without_template() {
        let tool = WebhookTool {
            name: "t".into(),
            description: "".into(),
            parameters: serde_json::json!({}),
            tool_id: "t1".into(),
            url: "https://example.com".into(),
            method: "POST".into(),
            headers: Default::default(),
            body_template: None,
            timeout_secs: 30,
            policy: Default::default(),
        };
        let args = serde_json::json!({"x": 1});
        assert_eq!(build_body(&tool, &args), Some(args));
    }

    #[test]
    fn test_build_body_renders_template_placeholders() {
        let tool = WebhookTool {
            name: "t".into(),
            description: "".into(),
            parameters: serde_json::json!({}),
            tool_id: "t1".into(),
            url: "https://example.com".into(),
            method: "POST".into(),
            headers: Default::default(),
            body_template: Some(serde_json::json!({"query": "{{q}}"})),
            timeout_secs: 30,
            policy: Default::default(),
        };
        let args = serde_json::json!({"q": "hello"});
        let body = build_body(&tool, &args).unwrap();
        assert_eq!(body["query"], "hello");
    }
}
