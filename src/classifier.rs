//! Render-mode heuristic deciding whether a statically fetched page needs a
//! headless re-render before extraction.

use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::config::ClassifierConfig;

/// Evidence that a page builds its content with scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum DynamicSignal {
    NearEmptyBody { text_chars: usize },
    SpaMarker { marker: String },
    LowTextRatio { ratio: f64 },
    ManyScripts { count: usize },
}

/// Classifier verdict for one static page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDecision {
    pub needs_dynamic: bool,
    pub confidence: f64,
    pub container_matches: usize,
    pub signals: Vec<DynamicSignal>,
}

/// Pluggable static-vs-dynamic strategy
pub trait RenderModeClassifier: Send + Sync {
    fn decide(&self, static_html: &str, container_selector: &str) -> RenderDecision;
}

/// Threshold-based classifier
pub struct HeuristicClassifier {
    config: ClassifierConfig,
}

impl HeuristicClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    fn collect_signals(&self, raw: &str, document: &Html) -> Vec<DynamicSignal> {
        let mut signals = Vec::new();

        let script_count = document.select(script_selector()).count();
        let text_chars = visible_body_text_chars(document);

        // An empty body only points at client rendering when something could fill it
        if script_count > 0 && text_chars < self.config.min_body_text_chars {
            signals.push(DynamicSignal::NearEmptyBody { text_chars });
        }

        for marker in &self.config.spa_markers {
            if raw.contains(marker.as_str()) {
                signals.push(DynamicSignal::SpaMarker { marker: marker.clone() });
            }
        }

        if raw.len() >= self.config.ratio_min_html_bytes {
            let ratio = text_chars as f64 / raw.len() as f64;
            if ratio < self.config.min_text_ratio {
                signals.push(DynamicSignal::LowTextRatio { ratio });
            }
        }

        if script_count > self.config.script_tag_threshold {
            signals.push(DynamicSignal::ManyScripts { count: script_count });
        }

        signals
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl RenderModeClassifier for HeuristicClassifier {
    fn decide(&self, static_html: &str, container_selector: &str) -> RenderDecision {
        let document = Html::parse_document(static_html);

        let container_matches = match Selector::parse(container_selector) {
            Ok(selector) => document.select(&selector).count(),
            Err(e) => {
                debug!("Container selector '{}' does not parse: {}", container_selector, e);
                0
            }
        };

        if container_matches > 0 {
            return RenderDecision {
                needs_dynamic: false,
                confidence: 0.9,
                container_matches,
                signals: Vec::new(),
            };
        }

        let signals = self.collect_signals(static_html, &document);
        let decision = if signals.is_empty() {
            RenderDecision {
                needs_dynamic: false,
                confidence: 0.6,
                container_matches,
                signals,
            }
        } else {
            RenderDecision {
                needs_dynamic: true,
                confidence: (0.5 + 0.15 * signals.len() as f64).min(0.95),
                container_matches,
                signals,
            }
        };

        debug!(
            "Render decision: dynamic={} confidence={:.2} signals={}",
            decision.needs_dynamic,
            decision.confidence,
            decision.signals.len()
        );
        decision
    }
}

fn script_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("script").expect("static selector"))
}

fn body_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("body").expect("static selector"))
}

/// Non-whitespace characters of body text outside script-like elements
fn visible_body_text_chars(document: &Html) -> usize {
    let Some(body) = document.select(body_selector()).next() else {
        return 0;
    };

    body.descendants()
        .filter_map(|node| {
            let Node::Text(text) = node.value() else {
                return None;
            };
            let hidden = node
                .parent()
                .and_then(|parent| parent.value().as_element())
                .map_or(false, |e| matches!(e.name(), "script" | "style" | "noscript" | "template"));
            (!hidden).then(|| text.chars().filter(|c| !c.is_whitespace()).count())
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPA_SHELL: &str = r#"<html><head><title>App</title></head>
        <body><div id="app"></div><script src="/static/js/app.js"></script></body></html>"#;

    fn static_page() -> String {
        let paragraphs: String = (0..20)
            .map(|i| format!("<p>Announcement number {} about the quarterly procurement results.</p>", i))
            .collect();
        format!("<html><body><main>{}</main></body></html>", paragraphs)
    }

    #[test]
    fn test_spa_shell_needs_dynamic() {
        let decision = HeuristicClassifier::default().decide(SPA_SHELL, "ul.news > li");

        assert!(decision.needs_dynamic);
        assert_eq!(decision.container_matches, 0);
        assert!(decision.signals.contains(&DynamicSignal::SpaMarker { marker: r#"id="app""#.to_string() }));
        assert!(decision
            .signals
            .iter()
            .any(|s| matches!(s, DynamicSignal::NearEmptyBody { .. })));
        assert!(decision.confidence > 0.5 && decision.confidence <= 0.95);
    }

    #[test]
    fn test_container_match_overrides_markers() {
        let html = r#"<body><div id="app"><ul class="news"><li>a</li></ul></div><script></script></body>"#;
        let decision = HeuristicClassifier::default().decide(html, "ul.news > li");

        assert!(!decision.needs_dynamic);
        assert_eq!(decision.container_matches, 1);
        assert!(decision.signals.is_empty());
    }

    #[test]
    fn test_rendered_static_page_is_not_dynamic() {
        let decision = HeuristicClassifier::default().decide(&static_page(), "table.results tr");

        assert!(!decision.needs_dynamic);
        assert!(decision.signals.is_empty());
    }

    #[test]
    fn test_script_text_is_not_body_text() {
        let filler = "x".repeat(500);
        let html = format!("<body><script>var data = '{}';</script></body>", filler);
        let decision = HeuristicClassifier::default().decide(&html, "li");

        assert!(decision
            .signals
            .contains(&DynamicSignal::NearEmptyBody { text_chars: 0 }));
    }

    #[test]
    fn test_many_scripts_signal() {
        let config = ClassifierConfig {
            script_tag_threshold: 2,
            ..ClassifierConfig::default()
        };
        let mut html = static_page();
        html.push_str("<script></script><script></script><script></script>");
        let decision = HeuristicClassifier::new(config).decide(&html, "li");

        assert!(decision.needs_dynamic);
        assert!(decision.signals.contains(&DynamicSignal::ManyScripts { count: 3 }));
    }
}
