//! Composed render of one in-flight reply.
//!
//! A pure function of the multiplexer's sub-state: the same `RenderState`
//! always yields the same string, so partial re-renders are deterministic
//! and testable in isolation.

/// Trailing glyph appended while the reply is still streaming.
pub const STREAMING_CURSOR: &str = "…";

/// Everything that feeds the composed render, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderState {
    /// Transient model status line (selected model, fallback progress).
    pub model_status: Option<String>,
    /// Transient tool status line.
    pub tool_status: Option<String>,
    /// Cumulative reasoning text; rendered as a quote block while
    /// streaming, dropped at finalization.
    pub reasoning: String,
    /// Committed body text from the chunker.
    pub body: String,
    /// While true, transient lines render and the cursor glyph trails.
    pub streaming: bool,
}

/// Compose the full draft text in fixed order: model status, tool status,
/// reasoning block, body, trailing cursor. With `streaming` false only the
/// body remains (finalized render).
#[must_use]
pub fn compose_render(state: &RenderState) -> String {
    let mut sections: Vec<String> = Vec::new();

    if state.streaming {
        if let Some(model) = state.model_status.as_deref().filter(|s| !s.is_empty()) {
            sections.push(format!("⚡ {model}"));
        }
        if let Some(tool) = state.tool_status.as_deref().filter(|s| !s.is_empty()) {
            sections.push(format!("⚙ {tool}"));
        }
        if !state.reasoning.trim().is_empty() {
            let quoted: Vec<String> = state
                .reasoning
                .trim()
                .lines()
                .map(|line| format!("> {line}"))
                .collect();
            sections.push(quoted.join("\n"));
        }
    }

    if !state.body.trim().is_empty() {
        sections.push(state.body.trim().to_string());
    }

    let mut text = sections.join("\n\n");
    if state.streaming {
        if text.is_empty() {
            text.push_str(STREAMING_CURSOR);
        } else {
            text.push(' ');
            text.push_str(STREAMING_CURSOR);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_state() -> RenderState {
        RenderState {
            model_status: Some("openai/gpt-5-mini".into()),
            tool_status: Some("running web_search".into()),
            reasoning: "thinking about it".into(),
            body: "Partial answer".into(),
            streaming: true,
        }
    }

    #[test]
    fn same_state_same_output() {
        let state = streaming_state();
        assert_eq!(compose_render(&state), compose_render(&state.clone()));
    }

    #[test]
    fn sections_render_in_fixed_order() {
        let text = compose_render(&streaming_state());
        let model = text.find("⚡ openai/gpt-5-mini").unwrap_or(usize::MAX);
        let tool = text.find("⚙ running web_search").unwrap_or(usize::MAX);
        let reasoning = text.find("> thinking about it").unwrap_or(usize::MAX);
        let body = text.find("Partial answer").unwrap_or(usize::MAX);
        assert!(model < tool && tool < reasoning && reasoning < body);
        assert!(text.ends_with(STREAMING_CURSOR));
    }

    #[test]
    fn finalized_render_is_body_only() {
        let mut state = streaming_state();
        state.streaming = false;
        assert_eq!(compose_render(&state), "Partial answer");
    }

    #[test]
    fn empty_streaming_state_is_just_the_cursor() {
        let state = RenderState {
            streaming: true,
            ..RenderState::default()
        };
        assert_eq!(compose_render(&state), STREAMING_CURSOR);
    }

    #[test]
    fn multi_line_reasoning_quotes_every_line() {
        let state = RenderState {
            reasoning: "first\nsecond".into(),
            streaming: true,
            ..RenderState::default()
        };
        let text = compose_render(&state);
        assert!(text.contains("> first\n> second"));
    }
}
