//! Emotion detection for expression rendering.
//!
//! Replies are classified into one of the 28 GoEmotions labels. The
//! classifier itself is an external text-classification model reached over
//! HTTP; the client is built on first use and reused afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::providers::{format_api_error, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Admiration,
    Amusement,
    Anger,
    Annoyance,
    Approval,
    Caring,
    Confusion,
    Curiosity,
    Desire,
    Disappointment,
    Disapproval,
    Disgust,
    Embarrassment,
    Excitement,
    Fear,
    Gratitude,
    Grief,
    Joy,
    Love,
    Nervousness,
    Optimism,
    Pride,
    Realization,
    Relief,
    Remorse,
    Sadness,
    Surprise,
    #[default]
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 28] = [
        Emotion::Admiration,
        Emotion::Amusement,
        Emotion::Anger,
        Emotion::Annoyance,
        Emotion::Approval,
        Emotion::Caring,
        Emotion::Confusion,
        Emotion::Curiosity,
        Emotion::Desire,
        Emotion::Disappointment,
        Emotion::Disapproval,
        Emotion::Disgust,
        Emotion::Embarrassment,
        Emotion::Excitement,
        Emotion::Fear,
        Emotion::Gratitude,
        Emotion::Grief,
        Emotion::Joy,
        Emotion::Love,
        Emotion::Nervousness,
        Emotion::Optimism,
        Emotion::Pride,
        Emotion::Realization,
        Emotion::Relief,
        Emotion::Remorse,
        Emotion::Sadness,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Admiration => "admiration",
            Emotion::Amusement => "amusement",
            Emotion::Anger => "anger",
            Emotion::Annoyance => "annoyance",
            Emotion::Approval => "approval",
            Emotion::Caring => "caring",
            Emotion::Confusion => "confusion",
            Emotion::Curiosity => "curiosity",
            Emotion::Desire => "desire",
            Emotion::Disappointment => "disappointment",
            Emotion::Disapproval => "disapproval",
            Emotion::Disgust => "disgust",
            Emotion::Embarrassment => "embarrassment",
            Emotion::Excitement => "excitement",
            Emotion::Fear => "fear",
            Emotion::Gratitude => "gratitude",
            Emotion::Grief => "grief",
            Emotion::Joy => "joy",
            Emotion::Love => "love",
            Emotion::Nervousness => "nervousness",
            Emotion::Optimism => "optimism",
            Emotion::Pride => "pride",
            Emotion::Realization => "realization",
            Emotion::Relief => "relief",
            Emotion::Remorse => "remorse",
            Emotion::Sadness => "sadness",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    pub fn from_label(label: &str) -> Option<Emotion> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|emotion| emotion.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps text to an [`Emotion`].
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Emotion, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// Text-classification responses come either flat or nested one level deep.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl ClassificationResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            ClassificationResponse::Nested(batches) => {
                batches.into_iter().next().unwrap_or_default()
            }
            ClassificationResponse::Flat(scores) => scores,
        }
    }
}

/// Highest-scoring known label; ties resolve to the earlier label in
/// [`Emotion::ALL`] so the result only depends on the scores.
fn pick_emotion(scores: Vec<LabelScore>) -> Result<Emotion, ProviderError> {
    let mut best: Option<(Emotion, f64)> = None;
    for entry in scores {
        let Some(emotion) = Emotion::from_label(&entry.label) else {
            debug!(label = %entry.label, "ignoring unknown emotion label");
            continue;
        };
        best = match best {
            Some((current, score))
                if score > entry.score
                    || (score == entry.score && current as usize <= emotion as usize) =>
            {
                Some((current, score))
            }
            _ => Some((emotion, entry.score)),
        };
    }
    best.map(|(emotion, _)| emotion)
        .ok_or_else(|| ProviderError::Protocol("classifier returned no known labels".to_string()))
}

/// GoEmotions classifier served by a text-classification HTTP endpoint.
pub struct HttpEmotionClassifier {
    endpoint: String,
    token: Option<String>,
    client: OnceCell<reqwest::Client>,
}

impl HttpEmotionClassifier {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.filter(|token| !token.trim().is_empty()),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, ProviderError> {
        self.client
            .get_or_try_init(|| async {
                debug!(endpoint = %self.endpoint, "initialising emotion classifier client");
                reqwest::Client::builder()
                    .build()
                    .map_err(ProviderError::from)
            })
            .await
    }
}

#[async_trait]
impl EmotionClassifier for HttpEmotionClassifier {
    async fn classify(&self, text: &str) -> Result<Emotion, ProviderError> {
        let client = self.client().await?;
        let mut request = client.post(&self.endpoint).json(&serde_json::json!({
            "inputs": text,
            "options": { "wait_for_model": true },
        }));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message: format_api_error(&body),
            });
        }

        let parsed: ClassificationResponse = response.json().await?;
        pick_emotion(parsed.into_scores())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(raw: &str) -> Vec<LabelScore> {
        serde_json::from_str::<ClassificationResponse>(raw)
            .unwrap()
            .into_scores()
    }

    #[test]
    fn there_are_28_distinct_labels() {
        let mut labels: Vec<&str> = Emotion::ALL.iter().map(|e| e.as_str()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 28);
    }

    #[test]
    fn labels_round_trip_through_serde() {
        for emotion in Emotion::ALL {
            let json = serde_json::to_string(&emotion).unwrap();
            assert_eq!(json, format!("\"{}\"", emotion.as_str()));
            assert_eq!(Emotion::from_label(emotion.as_str()), Some(emotion));
        }
    }

    #[test]
    fn picks_highest_score_from_nested_response() {
        let raw = r#"[[{"label":"joy","score":0.2},{"label":"anger","score":0.7},{"label":"neutral","score":0.1}]]"#;
        assert_eq!(pick_emotion(scores(raw)).unwrap(), Emotion::Anger);
    }

    #[test]
    fn picks_from_flat_response_and_skips_unknown_labels() {
        let raw = r#"[{"label":"LABEL_99","score":0.9},{"label":"Curiosity","score":0.4}]"#;
        assert_eq!(pick_emotion(scores(raw)).unwrap(), Emotion::Curiosity);
    }

    #[test]
    fn ties_resolve_to_label_order() {
        let raw = r#"[{"label":"sadness","score":0.5},{"label":"amusement","score":0.5}]"#;
        assert_eq!(pick_emotion(scores(raw)).unwrap(), Emotion::Amusement);
    }

    #[test]
    fn empty_response_is_an_error() {
        assert!(pick_emotion(Vec::new()).is_err());
    }
}
