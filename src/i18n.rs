use serde::{Deserialize, Serialize};

/// Answer language for the chatbot
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerLanguage {
    #[serde(rename = "vi")]
    #[default]
    Vietnamese,
    #[serde(rename = "en")]
    English,
}

impl std::fmt::Display for AnswerLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerLanguage::Vietnamese => write!(f, "vi"),
            AnswerLanguage::English => write!(f, "en"),
        }
    }
}

impl std::str::FromStr for AnswerLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vi" | "vietnamese" | "tiếng việt" => Ok(AnswerLanguage::Vietnamese),
            "en" | "english" => Ok(AnswerLanguage::English),
            _ => Err(format!("Unknown answer language: {}", s)),
        }
    }
}

impl AnswerLanguage {
    /// Descriptive name of the language
    pub fn display_name(&self) -> &'static str {
        match self {
            AnswerLanguage::Vietnamese => "Tiếng Việt",
            AnswerLanguage::English => "English",
        }
    }

    /// Instruction appended to every system prompt
    pub fn prompt_instruction(&self) -> &'static str {
        match self {
            AnswerLanguage::Vietnamese => {
                "Hãy trả lời bằng tiếng Việt, tự nhiên, thân thiện và chỉ dựa trên dữ liệu được cung cấp."
            }
            AnswerLanguage::English => {
                "Please answer in English, naturally and concisely, grounded strictly in the provided data."
            }
        }
    }
}
