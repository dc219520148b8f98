use ogent_shared::{AiAnalysis, AiValidation};

/// Pure-function pre-processing stage applied to a command string before
/// dispatch, or returned standalone from `/agents/{id}/analyze`. The real
/// backend this stands in for is out of scope; `AiStage` only fixes the
/// contract a networked implementation would have to satisfy.
pub trait AiStage: Send + Sync {
    fn process(
        &self,
        command: &str,
        system: Option<&str>,
        context: Option<&serde_json::Value>,
    ) -> AiAnalysis;
}

/// Keyword-based danger detection and light normalization, standing in for
/// the networked backend named by the contract above.
pub struct HeuristicAiStage {
    danger_patterns: Vec<regex::Regex>,
}

impl Default for HeuristicAiStage {
    fn default() -> Self {
        let patterns = [
            r"rm\s+-rf\s+/(\s|$)",
            r"mkfs\.",
            r":\(\)\s*\{.*:\|:.*\}\s*;\s*:",
            r"dd\s+if=.*of=/dev/(sd|nvme|hd)",
            r">\s*/dev/(sd|nvme|hd)",
            r"chmod\s+-R\s+777\s+/",
        ];

        let danger_patterns = patterns
            .iter()
            .map(|p| regex::Regex::new(p).expect("static danger pattern is valid regex"))
            .collect();

        Self { danger_patterns }
    }
}

impl AiStage for HeuristicAiStage {
    fn process(
        &self,
        command: &str,
        _system: Option<&str>,
        context: Option<&serde_json::Value>,
    ) -> AiAnalysis {
        let trimmed = command.trim();

        let danger = self
            .danger_patterns
            .iter()
            .find(|pattern| pattern.is_match(trimmed));

        let validation = match danger {
            Some(pattern) => AiValidation {
                safe: false,
                reason: Some(format!("matches destructive pattern: {}", pattern.as_str())),
            },
            None => AiValidation {
                safe: true,
                reason: None,
            },
        };

        let optimization = if trimmed.contains("| grep") && trimmed.contains("| wc -l") {
            Some("consider `grep -c` instead of `grep | wc -l`".to_string())
        } else {
            None
        };

        AiAnalysis {
            original_command: command.to_string(),
            processed_command: trimmed.to_string(),
            validation,
            optimization,
            enrichment: context.cloned(),
        }
    }
}
