//! Survey definitions: questions and their choice lists.
//!
//! Both are read-only on the device. They arrive from the remote store by
//! replication and are never written locally.

use serde::{Deserialize, Serialize};

/// How a question is answered and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
  FreeText,
  Number,
  Date,
  SingleChoiceSmall,
  SingleChoiceLarge,
  MultiChoiceSmall,
  MultiChoiceLarge,
  SearchableChoice,
  Map,
  File,
}

impl ResponseType {
  pub fn has_choices(self) -> bool {
    matches!(
      self,
      Self::SingleChoiceSmall
        | Self::SingleChoiceLarge
        | Self::MultiChoiceSmall
        | Self::MultiChoiceLarge
        | Self::SearchableChoice
    )
  }
}

/// One survey item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Question {
  #[serde(rename = "QuestionID")]
  pub question_id:   String,
  pub text:          String,
  pub response_type: ResponseType,
  #[serde(default)]
  pub required:      bool,
  /// Position in the survey; questions are presented in ascending order.
  #[serde(default)]
  pub index:         u32,
  /// Dependency expression over earlier answers, e.g. `Q1=3 AND Q2!=no`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub depends:       Option<String>,
  /// Question whose answer selects this question's cascading choices.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cascade_from:  Option<String>,
  #[serde(default)]
  pub organization:  String,
  #[serde(default)]
  pub program:       String,
}

/// One selectable option of a choice-type question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Choice {
  #[serde(rename = "QuestionID")]
  pub question_id:      String,
  #[serde(rename = "OptionID")]
  pub option_id:        String,
  pub text:             String,
  /// Option of the cascade-source question this choice belongs under.
  #[serde(rename = "ParentOptionID", default, skip_serializing_if = "Option::is_none")]
  pub parent_option_id: Option<String>,
  /// Dependency expression gating this single option.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub depends:          Option<String>,
  #[serde(default)]
  pub organization:     String,
  #[serde(default)]
  pub program:          String,
}
