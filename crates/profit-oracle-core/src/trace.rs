use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    Started,
    Finished,
    Failed,
}

impl TracePhase {
    fn as_str(self) -> &'static str {
        match self {
            TracePhase::Started => "started",
            TracePhase::Finished => "finished",
            TracePhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub node: String,
    pub phase: TracePhase,
    pub message: String,
    pub timestamp_ms: u128,
}

impl TraceEvent {
    pub fn new(node: impl Into<String>, phase: TracePhase, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            node: node.into(),
            phase,
            message: message.into(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(
        &mut self,
        node: impl Into<String>,
        phase: TracePhase,
        message: impl Into<String>,
    ) {
        self.events.push(TraceEvent::new(node, phase, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

/// Collector shared by graph tasks running concurrently.
#[derive(Debug, Clone, Default)]
pub struct SharedTrace(Arc<Mutex<TraceCollector>>);

impl SharedTrace {
    pub fn record(&self, node: &str, phase: TracePhase, message: impl Into<String>) {
        if let Ok(mut collector) = self.0.lock() {
            collector.record(node, phase, message);
        }
    }

    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.0
            .lock()
            .map(|collector| collector.events().to_vec())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub node: String,
    pub phase: TracePhase,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                node: event.node.clone(),
                phase: event.phase,
                message: event.message.clone(),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Trace Summary\n");
        for step in &self.steps {
            let _ = writeln!(
                output,
                "{}. {} [{}] → {}",
                step.index,
                step.node,
                step.phase.as_str(),
                step.message
            );
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        if self.steps.is_empty() {
            return "flowchart TD\n  %% no trace events captured".to_string();
        }

        let mut output = String::from("flowchart TD\n  %% auto-generated trace\n");
        for step in &self.steps {
            let node_id = format!("step{}", step.index);
            let label = sanitize_mermaid(&format!(
                "{} {}: {}",
                step.node,
                step.phase.as_str(),
                step.message
            ));
            let _ = writeln!(output, "  {node_id}[\"{label}\"]");
        }

        for idx in 0..self.steps.len().saturating_sub(1) {
            let _ = writeln!(output, "  step{} --> step{}", idx + 1, idx + 2);
        }

        output
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_steps() {
        let mut collector = TraceCollector::new();
        collector.record("manager", TracePhase::Started, "planning");
        collector.record("manager", TracePhase::Finished, "two packages issued");

        let markdown = collector.summary().render_markdown();
        assert!(markdown.contains("1. manager [started]"));
        assert!(markdown.contains("2. manager [finished]"));
    }

    #[test]
    fn mermaid_escapes_labels() {
        let events = vec![
            TraceEvent::new("research", TracePhase::Failed, "quota [exceeded]"),
            TraceEvent::new("synthesizer", TracePhase::Started, "merging"),
        ];
        let mermaid = TraceSummary::from_events(&events).render_mermaid();
        assert!(mermaid.contains("flowchart TD"));
        assert!(mermaid.contains("quota (exceeded)"));
        assert!(mermaid.contains("step1 --> step2"));
    }

    #[test]
    fn shared_trace_collects_across_clones() {
        let trace = SharedTrace::default();
        let clone = trace.clone();
        trace.record("research", TracePhase::Started, "a");
        clone.record("analytics", TracePhase::Started, "b");
        assert_eq!(trace.snapshot().len(), 2);
    }
}
