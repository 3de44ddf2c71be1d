//! Caller intent classification.
//!
//! The conversation flow only needs to know whether a reply to one of its two
//! scripted questions was a yes, a no, or neither. [`IntentClassifier`] is the
//! seam; [`KeywordClassifier`] is the lexicon-based default.

/// Which scripted question the caller is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// "Did that answer your question?"
    AnswerFeedback,
    /// "Do you have any other questions?"
    MoreQuestions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Affirmative,
    Negative,
    Unclear,
}

pub trait IntentClassifier: Send + Sync {
    fn classify(&self, prompt: Prompt, utterance: &str) -> Intent;
}

/// Affirmative and negative words or phrases for one prompt.
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
}

impl Lexicon {
    pub fn new(affirmative: &[&str], negative: &[&str]) -> Self {
        Self {
            affirmative: affirmative.iter().map(|s| normalize(s)).collect(),
            negative: negative.iter().map(|s| normalize(s)).collect(),
        }
    }

    fn classify(&self, utterance: &str) -> Intent {
        // Padded so phrase matches land on word boundaries.
        let text = format!(" {} ", normalize(utterance));
        let hit = |terms: &[String]| terms.iter().any(|t| text.contains(&format!(" {t} ")));

        match (hit(&self.affirmative), hit(&self.negative)) {
            (true, false) => Intent::Affirmative,
            (false, true) => Intent::Negative,
            _ => Intent::Unclear,
        }
    }
}

/// Lowercase, fold curly apostrophes, and collapse everything that is not a
/// letter, digit or apostrophe into single spaces.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' => '\'',
            c if c.is_alphanumeric() || c == '\'' => c,
            _ => ' ',
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct KeywordClassifier {
    answer_feedback: Lexicon,
    more_questions: Lexicon,
}

impl KeywordClassifier {
    pub fn new(answer_feedback: Lexicon, more_questions: Lexicon) -> Self {
        Self {
            answer_feedback,
            more_questions,
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            Lexicon::new(
                &[
                    "yes", "yeah", "yep", "correct", "right", "good", "helpful", "helped",
                    "thanks", "thank you",
                ],
                &["no", "nope", "didn't", "didnt", "not", "wrong"],
            ),
            Lexicon::new(
                &["yes", "yeah", "yep", "another", "one more", "also"],
                &["no", "nope", "that's all", "thats all", "nothing", "done"],
            ),
        )
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, prompt: Prompt, utterance: &str) -> Intent {
        match prompt {
            Prompt::AnswerFeedback => self.answer_feedback.classify(utterance),
            Prompt::MoreQuestions => self.more_questions.classify(utterance),
        }
    }
}
