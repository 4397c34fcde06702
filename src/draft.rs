//! Reply drafting.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DraftConfig;
use crate::error::{AgentError, AgentResult};
use crate::gmail::EmailContent;
use crate::llm::{strip_think_blocks, LlmClient};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Normal,
    Friendly,
    Professional,
}

impl Tone {
    pub fn temperature(self) -> f32 {
        match self {
            Self::Normal => 0.7,
            Self::Friendly => 0.9,
            Self::Professional => 0.5,
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::Normal => {
                "Write a NORMAL, straightforward email reply. Use a balanced tone that is \
                 neither too formal nor too casual. Be clear and polite, and keep it to the point."
            }
            Self::Friendly => {
                "Write a WARM, FRIENDLY and CASUAL reply. Use a conversational, approachable \
                 tone with contractions and some enthusiasm, as if writing to a friend."
            }
            Self::Professional => {
                "Write a FORMAL and PROFESSIONAL reply suitable for official correspondence. \
                 Use formal salutations, avoid contractions and stay precise and courteous."
            }
        }
    }
}

impl Display for Tone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Friendly => write!(f, "friendly"),
            Self::Professional => write!(f, "professional"),
        }
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(Self::Normal),
            "friendly" | "casual" => Ok(Self::Friendly),
            "professional" | "formal" => Ok(Self::Professional),
            other => Err(format!(
                "unknown tone '{other}' (expected normal, friendly or professional)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub in_reply_to: String,
    pub body: String,
    pub tone: Tone,
    pub model: String,
    pub latency_ms: u64,
}

pub struct DraftPipeline {
    llm: Arc<dyn LlmClient>,
    config: DraftConfig,
}

impl DraftPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, config: DraftConfig) -> Self {
        Self { llm, config }
    }

    pub fn default_tone(&self) -> Tone {
        self.config.default_tone
    }

    pub async fn generate(&self, email: &EmailContent, tone: Tone) -> AgentResult<Draft> {
        let prompt = drafting_prompt(email, tone);
        let started = Instant::now();

        let raw = self
            .llm
            .generate(&prompt, tone.temperature())
            .await
            .map_err(|error| AgentError::DraftGenerationFailed(error.to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let body = strip_closing(&strip_think_blocks(&raw));
        if body.is_empty() {
            return Err(AgentError::DraftGenerationFailed(
                "model returned an empty draft".to_string(),
            ));
        }
        debug!(
            "drafted reply to {} with tone {tone} in {latency_ms}ms",
            email.id
        );

        let body = match self.config.signature.as_deref().map(str::trim) {
            Some(signature) if !signature.is_empty() => format!("{body}\n\n{signature}"),
            _ => body,
        };

        Ok(Draft {
            in_reply_to: email.id.clone(),
            body,
            tone,
            model: self.llm.model().to_string(),
            latency_ms,
        })
    }
}

fn drafting_prompt(email: &EmailContent, tone: Tone) -> String {
    let tone_name = tone.to_string().to_uppercase();
    format!(
        "You are an email assistant writing a reply in a SPECIFIC tone.\n\n\
         === TONE: {tone_name} ===\n{instruction}\n\n\
         === ORIGINAL EMAIL ===\nFrom: {from}\nSubject: {subject}\n\n{body}\n\
         === END OF EMAIL ===\n\n\
         === INSTRUCTIONS ===\n\
         1. Write ONLY the email body content\n\
         2. Do NOT include a Subject line or any email headers\n\
         3. Do NOT add a signature or closing phrase such as 'Regards' or 'Thanks'\n\
         4. Do NOT sign off with any name\n\
         5. The tone MUST be clearly {tone_name}\n\n\
         Write the reply body now:",
        instruction = tone.instruction(),
        from = email.from,
        subject = email.subject,
        body = email.body,
    )
}

/// Drops a trailing sign-off ("Best regards,\nSam") the model added despite
/// the prompt.
fn strip_closing(draft: &str) -> String {
    static CLOSING: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = CLOSING.get_or_init(|| {
        Regex::new(
            r"(?is)\n\s*(best regards|kind regards|warm regards|regards|sincerely|yours truly|yours sincerely|thanks|thank you|cheers|best|warmly|take care|with appreciation)[,.!]?\s*(\n[^\n]{0,60}){0,3}\s*$",
        )
        .ok()
    });

    let trimmed = draft.trim();
    match pattern {
        Some(pattern) => pattern.replace(trimmed, "").trim().to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{strip_closing, DraftPipeline, Tone};
    use crate::agent::session::Message;
    use crate::config::DraftConfig;
    use crate::error::AgentError;
    use crate::gmail::EmailContent;
    use crate::llm::{LlmClient, LlmError, LlmReply, ToolSpec};

    struct CannedLlm {
        output: Result<String, LlmError>,
        temperatures: Mutex<Vec<f32>>,
    }

    impl CannedLlm {
        fn new(output: Result<String, LlmError>) -> Self {
            Self {
                output,
                temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(
            &self,
            _system: &str,
            _history: &[Message],
            _tools: &[ToolSpec],
        ) -> Result<LlmReply, LlmError> {
            Ok(LlmReply::default())
        }

        async fn generate(&self, _prompt: &str, temperature: f32) -> Result<String, LlmError> {
            self.temperatures.lock().unwrap().push(temperature);
            self.output.clone()
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    fn email() -> EmailContent {
        EmailContent {
            id: "m-1".to_string(),
            thread_id: "t-1".to_string(),
            from: "Alex <alex@example.com>".to_string(),
            from_address: "alex@example.com".to_string(),
            to: vec!["me@example.com".to_string()],
            subject: "Lunch?".to_string(),
            date: None,
            body: "Free for lunch Thursday?".to_string(),
            labels: Vec::new(),
            unread: true,
            rfc822_message_id: None,
        }
    }

    #[test]
    fn tones_parse_and_have_distinct_temperatures() {
        assert_eq!("Friendly".parse::<Tone>(), Ok(Tone::Friendly));
        assert_eq!("formal".parse::<Tone>(), Ok(Tone::Professional));
        assert!("sarcastic".parse::<Tone>().is_err());
        assert!(Tone::Friendly.temperature() > Tone::Normal.temperature());
        assert!(Tone::Professional.temperature() < Tone::Normal.temperature());
    }

    #[test]
    fn closings_are_stripped() {
        assert_eq!(
            strip_closing("Thursday works for me.\n\nBest regards,\nSam"),
            "Thursday works for me."
        );
        assert_eq!(
            strip_closing("Sounds great!\nCheers"),
            "Sounds great!"
        );
        assert_eq!(
            strip_closing("Thanks for the invite, Thursday works."),
            "Thanks for the invite, Thursday works."
        );
    }

    #[tokio::test]
    async fn draft_gets_signature_and_tone_temperature() {
        let llm = Arc::new(CannedLlm::new(Ok(
            "<think>keep it short</think>Thursday works!\n\nRegards,\nBot".to_string(),
        )));
        let pipeline = DraftPipeline::new(
            llm.clone(),
            DraftConfig {
                signature: Some("Regards,\nSam".to_string()),
                default_tone: Tone::Normal,
            },
        );

        let draft = pipeline.generate(&email(), Tone::Friendly).await.expect("draft");
        assert_eq!(draft.body, "Thursday works!\n\nRegards,\nSam");
        assert_eq!(draft.in_reply_to, "m-1");
        assert_eq!(draft.model, "canned");
        assert_eq!(draft.tone, Tone::Friendly);
        assert_eq!(llm.temperatures.lock().unwrap().as_slice(), [0.9]);
    }

    #[tokio::test]
    async fn empty_or_failed_generation_is_an_error() {
        for output in [
            Ok("   ".to_string()),
            Ok("<think>nothing</think>".to_string()),
            Err(LlmError::Transport("timed out".to_string())),
        ] {
            let pipeline = DraftPipeline::new(
                Arc::new(CannedLlm::new(output)),
                DraftConfig::default(),
            );
            let error = pipeline
                .generate(&email(), Tone::Normal)
                .await
                .expect_err("no placeholder draft");
            assert!(matches!(error, AgentError::DraftGenerationFailed(_)));
        }
    }
}
