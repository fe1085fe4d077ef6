//! Embeddable widget snippet.
//!
//! The snippet loads `/widget.js` from the public base URL and creates one
//! widget instance bound to a single agent credential. Several snippets can
//! live on the same page; each one gets its own instance.

use parley_core::config::WidgetConfig;
use parley_core::models::Agent;

/// Encode `value` as a JavaScript string literal that is safe inside an
/// inline `<script>` element.
pub fn js_string(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted
        .replace("</", "<\\/")
        .replace("<!--", "<\\!--")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn base_url(widget: &WidgetConfig) -> &str {
    widget.public_base_url.trim_end_matches('/')
}

/// Render the HTML snippet a site owner pastes into their pages.
pub fn render(widget: &WidgetConfig, agent: &Agent) -> String {
    let base = base_url(widget);
    let chat_url = format!("{}/api/widget/chat", base);
    let script_url = format!("{}/widget.js", base);

    format!(
        r#"<!-- Parley chat widget -->
<script>
  (function () {{
    var config = {{
      apiUrl: {api_url},
      apiKey: {api_key},
      agentName: {agent_name},
      agentRole: {agent_role},
      position: {position},
      primaryColor: {primary_color},
      greetingMessage: {greeting}
    }};
    function start() {{
      window.ParleyWidget.create(config);
    }}
    if (window.ParleyWidget) {{
      start();
      return;
    }}
    var script = document.createElement('script');
    script.src = {script_url};
    script.async = true;
    script.onload = start;
    document.head.appendChild(script);
  }})();
</script>"#,
        api_url = js_string(&chat_url),
        api_key = js_string(&agent.api_key),
        agent_name = js_string(&agent.name),
        agent_role = js_string(&agent.role),
        position = js_string(&widget.position),
        primary_color = js_string(&widget.primary_color),
        greeting = js_string(&widget.greeting),
        script_url = js_string(&script_url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn agent(name: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            role: "support assistant".to_string(),
            instructions: None,
            model: "mistral-small-2402".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            top_p: 1.0,
            api_key: "agent_abc123".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_points_at_public_base() {
        let widget = WidgetConfig {
            public_base_url: "https://chat.example.com/".to_string(),
            ..Default::default()
        };
        let html = render(&widget, &agent("Helper"));

        assert!(html.contains(r#"apiUrl: "https://chat.example.com/api/widget/chat""#));
        assert!(html.contains(r#"script.src = "https://chat.example.com/widget.js""#));
        assert!(html.contains(r#"apiKey: "agent_abc123""#));
        assert!(html.contains("ParleyWidget.create(config)"));
        assert!(html.contains(r##"primaryColor: "#2563eb""##));
    }

    #[test]
    fn test_render_escapes_agent_name() {
        let html = render(&WidgetConfig::default(), &agent(r#"Bob "the" </script><b>"#));

        assert!(html.contains(r#"agentName: "Bob \"the\" <\/script><b>""#));
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[test]
    fn test_js_string_line_separators() {
        assert_eq!(js_string("a\u{2028}b"), "\"a\\u2028b\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
        assert_eq!(js_string("<!-- x"), "\"<\\!-- x\"");
    }
}
