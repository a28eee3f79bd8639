//! Survey definitions and the client-side checks that run before any network call.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const DEFAULT_RATING_SCALE: u8 = 5;
pub const MIN_RATING_SCALE: u8 = 2;
pub const MAX_RATING_SCALE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    MultipleChoice,
    Text,
    Rating,
    YesNo,
    Checkbox,
}

impl QuestionType {
    pub fn needs_options(&self) -> bool { matches!(self, QuestionType::MultipleChoice | QuestionType::Checkbox) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_to_question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowIf {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_scale: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_if: Option<ShowIf>,
}

impl Question {
    pub fn scale(&self) -> u8 { self.rating_scale.unwrap_or(DEFAULT_RATING_SCALE) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurveyStatus {
    #[default]
    Draft,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub status: SurveyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// One problem found in a survey definition or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyIssue {
    EmptyTitle,
    NoQuestions,
    EmptyQuestionText { question: usize },
    DuplicateQuestionId { id: String },
    TooFewOptions { question: usize, found: usize },
    RatingScaleOutOfRange { question: usize, scale: u8 },
    ShowIfUnknown { question: usize, target: String },
    ShowIfNotEarlier { question: usize, target: String },
    UnknownBranchTarget { question: usize, target: String },
    WrongSurvey { expected: String, found: String },
    UnknownQuestion { id: String },
    MissingAnswer { id: String },
    InvalidAnswer { id: String, answer: String },
}

impl fmt::Display for SurveyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Question positions are shown 1-based, as a form builder numbers them.
        match self {
            SurveyIssue::EmptyTitle => write!(f, "Survey title is required"),
            SurveyIssue::NoQuestions => write!(f, "Add at least one question"),
            SurveyIssue::EmptyQuestionText { question } => write!(f, "Question {} has no text", question + 1),
            SurveyIssue::DuplicateQuestionId { id } => write!(f, "Question id '{}' is used more than once", id),
            SurveyIssue::TooFewOptions { question, found } => {
                write!(f, "Question {} needs at least 2 options (has {})", question + 1, found)
            }
            SurveyIssue::RatingScaleOutOfRange { question, scale } => write!(
                f,
                "Question {} rating scale {} is outside {}..={}",
                question + 1,
                scale,
                MIN_RATING_SCALE,
                MAX_RATING_SCALE
            ),
            SurveyIssue::ShowIfUnknown { question, target } => {
                write!(f, "Question {} depends on unknown question '{}'", question + 1, target)
            }
            SurveyIssue::ShowIfNotEarlier { question, target } => {
                write!(f, "Question {} depends on '{}', which is not an earlier question", question + 1, target)
            }
            SurveyIssue::UnknownBranchTarget { question, target } => {
                write!(f, "Question {} branches to unknown question '{}'", question + 1, target)
            }
            SurveyIssue::WrongSurvey { expected, found } => {
                write!(f, "Response is for survey '{}', not '{}'", found, expected)
            }
            SurveyIssue::UnknownQuestion { id } => write!(f, "Answer to unknown question '{}'", id),
            SurveyIssue::MissingAnswer { id } => write!(f, "Question '{}' is required", id),
            SurveyIssue::InvalidAnswer { id, answer } => write!(f, "'{}' is not a valid answer to '{}'", answer, id),
        }
    }
}

fn into_result(code: &str, issues: Vec<SurveyIssue>) -> AppResult<()> {
    if issues.is_empty() {
        return Ok(());
    }
    let msg = issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ");
    Err(AppError::user(code, msg))
}

impl Survey {
    pub fn question(&self, id: &str) -> Option<&Question> { self.questions.iter().find(|q| q.id == id) }

    /// Every problem in the definition, in question order.
    pub fn issues(&self) -> Vec<SurveyIssue> {
        let mut out = Vec::new();
        if self.title.trim().is_empty() {
            out.push(SurveyIssue::EmptyTitle);
        }
        if self.questions.is_empty() {
            out.push(SurveyIssue::NoQuestions);
        }
        let mut position: HashMap<&str, usize> = HashMap::new();
        for (i, q) in self.questions.iter().enumerate() {
            if position.insert(q.id.as_str(), i).is_some() {
                out.push(SurveyIssue::DuplicateQuestionId { id: q.id.clone() });
            }
        }
        for (i, q) in self.questions.iter().enumerate() {
            if q.text.trim().is_empty() {
                out.push(SurveyIssue::EmptyQuestionText { question: i });
            }
            if q.kind.needs_options() && q.options.len() < 2 {
                out.push(SurveyIssue::TooFewOptions { question: i, found: q.options.len() });
            }
            if q.kind == QuestionType::Rating && !(MIN_RATING_SCALE..=MAX_RATING_SCALE).contains(&q.scale()) {
                out.push(SurveyIssue::RatingScaleOutOfRange { question: i, scale: q.scale() });
            }
            if let Some(cond) = &q.show_if {
                match position.get(cond.question_id.as_str()) {
                    None => out.push(SurveyIssue::ShowIfUnknown { question: i, target: cond.question_id.clone() }),
                    Some(&j) if j >= i => {
                        out.push(SurveyIssue::ShowIfNotEarlier { question: i, target: cond.question_id.clone() })
                    }
                    Some(_) => {}
                }
            }
            for target in q.options.iter().filter_map(|o| o.go_to_question.as_deref()) {
                if !position.contains_key(target) {
                    out.push(SurveyIssue::UnknownBranchTarget { question: i, target: target.to_string() });
                }
            }
        }
        out
    }

    pub fn validate(&self) -> AppResult<()> { into_result("survey_invalid", self.issues()) }
}

/// A single answer; checkbox questions take several values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AnswerValue {
    fn values(&self) -> Vec<&str> {
        match self {
            AnswerValue::Single(s) => vec![s.as_str()],
            AnswerValue::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }

    fn is_blank(&self) -> bool { self.values().iter().all(|v| v.trim().is_empty()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub answer: AnswerValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub survey_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respondent_id: Option<String>,
    pub answers: Vec<Answer>,
}

impl SurveyResponse {
    pub fn answer(&self, question_id: &str) -> Option<&AnswerValue> {
        self.answers.iter().find(|a| a.question_id == question_id).map(|a| &a.answer)
    }

    /// A question is shown unless its condition names an answer that was not given.
    fn is_visible(&self, q: &Question) -> bool {
        match &q.show_if {
            None => true,
            Some(cond) => self.answer(&cond.question_id).map(|a| a.values().contains(&cond.answer.as_str())).unwrap_or(false),
        }
    }

    fn answer_is_valid(q: &Question, a: &AnswerValue) -> bool {
        match q.kind {
            QuestionType::Text => true,
            QuestionType::MultipleChoice => {
                matches!(a, AnswerValue::Single(v) if q.options.iter().any(|o| &o.value == v))
            }
            QuestionType::Checkbox => a.values().iter().all(|v| q.options.iter().any(|o| o.value == *v)),
            QuestionType::YesNo => matches!(a, AnswerValue::Single(v) if v == "yes" || v == "no"),
            QuestionType::Rating => match a {
                AnswerValue::Single(v) => v.trim().parse::<u8>().map(|n| n >= 1 && n <= q.scale()).unwrap_or(false),
                AnswerValue::Multiple(_) => false,
            },
        }
    }

    pub fn issues_against(&self, survey: &Survey) -> Vec<SurveyIssue> {
        let mut out = Vec::new();
        if let Some(id) = survey.id.as_deref() {
            if id != self.survey_id {
                out.push(SurveyIssue::WrongSurvey { expected: id.to_string(), found: self.survey_id.clone() });
            }
        }
        for a in &self.answers {
            match survey.question(&a.question_id) {
                None => out.push(SurveyIssue::UnknownQuestion { id: a.question_id.clone() }),
                Some(q) if !a.answer.is_blank() && !Self::answer_is_valid(q, &a.answer) => {
                    out.push(SurveyIssue::InvalidAnswer { id: q.id.clone(), answer: a.answer.values().join(", ") })
                }
                Some(_) => {}
            }
        }
        for q in survey.questions.iter().filter(|q| q.required && self.is_visible(q)) {
            if self.answer(&q.id).map(AnswerValue::is_blank).unwrap_or(true) {
                out.push(SurveyIssue::MissingAnswer { id: q.id.clone() });
            }
        }
        out
    }

    pub fn validate_against(&self, survey: &Survey) -> AppResult<()> {
        into_result("response_invalid", self.issues_against(survey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey() -> Survey {
        serde_json::from_value(serde_json::json!({
            "id": "s1",
            "title": "Ward 42 priorities",
            "description": "",
            "questions": [
                {"id": "q1", "type": "yes-no", "text": "Did you vote last time?", "required": true},
                {"id": "q2", "type": "multiple-choice", "text": "Top issue?", "required": true,
                 "options": [{"id": "o1", "label": "Water", "value": "water"},
                             {"id": "o2", "label": "Roads", "value": "roads"}]},
                {"id": "q3", "type": "rating", "text": "Rate your MLA", "required": true, "ratingScale": 10,
                 "showIf": {"questionId": "q1", "answer": "yes"}},
                {"id": "q4", "type": "checkbox", "text": "Which media?", "required": false,
                 "options": [{"id": "a", "label": "TV", "value": "tv"}, {"id": "b", "label": "Radio", "value": "radio"}]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn well_formed_survey_passes() {
        assert!(survey().validate().is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut s = survey();
        s.title = "  ".into();
        s.questions[1].options.truncate(1);
        s.questions[2].rating_scale = Some(11);
        s.questions[2].show_if = Some(ShowIf { question_id: "q4".into(), answer: "tv".into() });
        s.questions[3].text = String::new();
        let issues = s.issues();
        assert_eq!(
            issues,
            vec![
                SurveyIssue::EmptyTitle,
                SurveyIssue::TooFewOptions { question: 1, found: 1 },
                SurveyIssue::RatingScaleOutOfRange { question: 2, scale: 11 },
                SurveyIssue::ShowIfNotEarlier { question: 2, target: "q4".into() },
                SurveyIssue::EmptyQuestionText { question: 3 },
            ]
        );
        let err = s.validate().unwrap_err();
        assert!(matches!(err, AppError::UserInput { .. }));
        assert!(err.message().contains("Survey title is required"));
    }

    #[test]
    fn empty_survey() {
        let s = Survey { id: None, title: "x".into(), description: String::new(), questions: vec![], status: SurveyStatus::Draft, organization_id: None };
        assert_eq!(s.issues(), vec![SurveyIssue::NoQuestions]);
    }

    #[test]
    fn hidden_required_question_may_be_skipped() {
        let r: SurveyResponse = serde_json::from_value(serde_json::json!({
            "survey_id": "s1",
            "answers": [{"question_id": "q1", "answer": "no"}, {"question_id": "q2", "answer": "water"}]
        }))
        .unwrap();
        assert!(r.validate_against(&survey()).is_ok());
    }

    #[test]
    fn visible_required_and_option_set_are_enforced() {
        let r: SurveyResponse = serde_json::from_value(serde_json::json!({
            "survey_id": "s1",
            "answers": [
                {"question_id": "q1", "answer": "yes"},
                {"question_id": "q2", "answer": "electricity"},
                {"question_id": "q4", "answer": ["tv", "cinema"]}
            ]
        }))
        .unwrap();
        let issues = r.issues_against(&survey());
        assert_eq!(
            issues,
            vec![
                SurveyIssue::InvalidAnswer { id: "q2".into(), answer: "electricity".into() },
                SurveyIssue::InvalidAnswer { id: "q4".into(), answer: "tv, cinema".into() },
                SurveyIssue::MissingAnswer { id: "q3".into() },
            ]
        );
    }

    #[test]
    fn rating_bounds_follow_scale() {
        let s = survey();
        let q3 = s.question("q3").unwrap();
        assert!(SurveyResponse::answer_is_valid(q3, &AnswerValue::Single("10".into())));
        assert!(!SurveyResponse::answer_is_valid(q3, &AnswerValue::Single("0".into())));
        assert!(!SurveyResponse::answer_is_valid(q3, &AnswerValue::Single("11".into())));
    }
}
