//! whisper.cpp command-line transcription engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::command::run_command;
use super::transcription::TranscriptionEngine;
use crate::policy::QualityTier;
use crate::subtitles::{Cue, Transcript, Word};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    result: Option<WhisperResult>,
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: Offsets,
    text: String,
    #[serde(default)]
    tokens: Vec<WhisperToken>,
}

#[derive(Debug, Deserialize)]
struct WhisperToken {
    text: String,
    offsets: Offsets,
}

/// Milliseconds.
#[derive(Debug, Deserialize)]
struct Offsets {
    from: u64,
    to: u64,
}

pub struct WhisperCppEngine {
    binary: String,
    models_dir: PathBuf,
}

impl WhisperCppEngine {
    pub fn new(binary: impl Into<String>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            models_dir: models_dir.into(),
        }
    }

    /// `ggml-<model>.bin` for the tier.
    pub fn model_path(&self, tier: QualityTier) -> PathBuf {
        self.models_dir
            .join(format!("ggml-{}.bin", tier.model_name()))
    }

    fn parse_output(json: &str) -> Result<Transcript> {
        let output: WhisperOutput = serde_json::from_str(json)
            .map_err(|e| Error::Collaborator(format!("Unreadable whisper output: {e}")))?;

        let cues = output
            .transcription
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|segment| Cue {
                start: ms(segment.offsets.from),
                end: ms(segment.offsets.to),
                text: segment.text.trim().to_string(),
                words: merge_tokens(segment.tokens),
            })
            .collect();

        Ok(Transcript {
            language: output.result.and_then(|r| r.language),
            cues,
        })
    }
}

fn ms(value: u64) -> f64 {
    value as f64 / 1000.0
}

/// Join sub-word tokens into words. A token with leading whitespace starts a
/// new word; special tokens (`[_BEG_]`, `[_TT_..]`) are dropped.
fn merge_tokens(tokens: Vec<WhisperToken>) -> Vec<Word> {
    let mut words: Vec<Word> = Vec::new();
    for token in tokens {
        if token.text.starts_with("[_") || token.text.trim().is_empty() {
            continue;
        }
        let starts_word = token.text.starts_with(char::is_whitespace);
        match words.last_mut() {
            Some(last) if !starts_word => {
                last.text.push_str(&token.text);
                last.end = ms(token.offsets.to);
            }
            _ => words.push(Word {
                text: token.text.trim_start().to_string(),
                start: ms(token.offsets.from),
                end: ms(token.offsets.to),
            }),
        }
    }
    words
}

#[async_trait]
impl TranscriptionEngine for WhisperCppEngine {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        tier: QualityTier,
        threads: usize,
    ) -> Result<Transcript> {
        let model = self.model_path(tier);
        if !tokio::fs::try_exists(&model).await.unwrap_or(false) {
            return Err(Error::CollaboratorFatal(format!(
                "Whisper model not found: {}",
                model.display()
            )));
        }

        let prefix = audio.with_extension("whisper");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(&model)
            .arg("-f")
            .arg(audio)
            .args(["-l", language, "-t", &threads.max(1).to_string()])
            .args(["-ojf", "-np", "-of"])
            .arg(&prefix);

        debug!(audio = %audio.display(), %tier, "Running whisper.cpp");
        run_command(&mut cmd).await?.ensure_success(&self.binary)?;

        let json_path = prefix.with_extension("whisper.json");
        let json = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| {
                Error::Collaborator(format!("Missing whisper output {}: {e}", json_path.display()))
            })?;
        let _ = tokio::fs::remove_file(&json_path).await;

        Self::parse_output(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "result": { "language": "en" },
        "transcription": [
            {
                "offsets": { "from": 0, "to": 1500 },
                "text": " Hello world",
                "tokens": [
                    { "text": "[_BEG_]", "offsets": { "from": 0, "to": 0 } },
                    { "text": " Hel", "offsets": { "from": 0, "to": 300 } },
                    { "text": "lo", "offsets": { "from": 300, "to": 600 } },
                    { "text": " world", "offsets": { "from": 700, "to": 1500 } }
                ]
            },
            { "offsets": { "from": 1500, "to": 2000 }, "text": "  " }
        ]
    }"#;

    #[test]
    fn test_parse_full_json() {
        let transcript = WhisperCppEngine::parse_output(SAMPLE).unwrap();
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.cues.len(), 1);

        let cue = &transcript.cues[0];
        assert_eq!(cue.text, "Hello world");
        assert_eq!(cue.end, 1.5);
        let words: Vec<&str> = cue.words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(words, vec!["Hello", "world"]);
        assert_eq!(cue.words[0].end, 0.6);
    }

    #[test]
    fn test_garbage_output_is_recoverable() {
        let err = WhisperCppEngine::parse_output("not json").unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_model_path_per_tier() {
        let engine = WhisperCppEngine::new("whisper-cli", "/models");
        assert_eq!(
            engine.model_path(QualityTier::Base),
            PathBuf::from("/models/ggml-base.bin")
        );
    }

    #[tokio::test]
    async fn test_missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WhisperCppEngine::new("whisper-cli", dir.path());
        let err = engine
            .transcribe(&dir.path().join("a.wav"), "en", QualityTier::Tiny, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CollaboratorFatal(_)));
    }
}
