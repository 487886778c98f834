//! The in-memory question bank and lazy dependency evaluation over it.

use crate::{
  depends::{CaseAnswers, Comparison, DependencyExpr},
  survey::{Choice, Question},
};

/// Questions (in survey order) and all their choices.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
  questions: Vec<Question>,
  choices:   Vec<Choice>,
}

impl QuestionBank {
  pub fn new(mut questions: Vec<Question>, choices: Vec<Choice>) -> Self {
    questions.sort_by(|a, b| {
      a.index
        .cmp(&b.index)
        .then_with(|| a.question_id.cmp(&b.question_id))
    });
    Self { questions, choices }
  }

  pub fn questions(&self) -> &[Question] { &self.questions }

  pub fn choices(&self) -> &[Choice] { &self.choices }

  pub fn question(&self, question_id: &str) -> Option<&Question> {
    self.questions.iter().find(|q| q.question_id == question_id)
  }

  pub fn first(&self) -> Option<&Question> { self.questions.first() }

  /// Whether `question` should be asked given `answers`. Questions without a
  /// dependency are always eligible; an unparsable dependency hides the
  /// question.
  pub fn is_eligible(&self, question: &Question, answers: &CaseAnswers, mode: Comparison) -> bool {
    depends_holds(question.depends.as_deref(), answers, mode)
  }

  /// The first eligible question strictly after `after` (or from the start).
  pub fn next_question(
    &self,
    after: Option<&str>,
    answers: &CaseAnswers,
    mode: Comparison,
  ) -> Option<&Question> {
    let start = match after {
      Some(id) => self.questions.iter().position(|q| q.question_id == id)? + 1,
      None => 0,
    };
    self.questions[start..]
      .iter()
      .find(|q| self.is_eligible(q, answers, mode))
  }

  /// Choices of `question_id` that are selectable given `answers`.
  ///
  /// A choice is dropped when its own dependency fails, or when it names a
  /// parent option and the question's cascade source has not selected that
  /// option.
  pub fn eligible_choices(
    &self,
    question_id: &str,
    answers: &CaseAnswers,
    mode: Comparison,
  ) -> Vec<&Choice> {
    let cascade = self
      .question(question_id)
      .and_then(|q| q.cascade_from.as_deref())
      .and_then(|source| answers.get(source));

    self
      .choices
      .iter()
      .filter(|c| c.question_id == question_id)
      .filter(|c| match (&c.parent_option_id, cascade) {
        (None, _) => true,
        (Some(parent), Some(answer)) => answer.selects(parent),
        (Some(_), None) => false,
      })
      .filter(|c| depends_holds(c.depends.as_deref(), answers, mode))
      .collect()
  }
}

fn depends_holds(expr: Option<&str>, answers: &CaseAnswers, mode: Comparison) -> bool {
  match expr.map(str::trim) {
    None | Some("") => true,
    Some(expr) => DependencyExpr::parse(expr).is_ok_and(|e| e.holds(answers, mode)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{response::AnswerValue, survey::ResponseType};

  fn question(id: &str, index: u32, depends: Option<&str>) -> Question {
    Question {
      question_id:   id.into(),
      text:          format!("question {id}"),
      response_type: ResponseType::FreeText,
      required:      false,
      index,
      depends:       depends.map(Into::into),
      cascade_from:  None,
      organization:  "Mercy".into(),
      program:       "PT".into(),
    }
  }

  fn choice(question_id: &str, option: &str, parent: Option<&str>) -> Choice {
    Choice {
      question_id:      question_id.into(),
      option_id:        option.into(),
      text:             option.to_uppercase(),
      parent_option_id: parent.map(Into::into),
      depends:          None,
      organization:     "Mercy".into(),
      program:          "PT".into(),
    }
  }

  fn text(answers: &mut CaseAnswers, q: &str, v: &str) {
    answers.insert(q, AnswerValue::Text(v.into()));
  }

  #[test]
  fn questions_are_ordered_by_index() {
    let bank = QuestionBank::new(
      vec![question("Q3", 3, None), question("Q1", 1, None), question("Q2", 2, None)],
      vec![],
    );
    let ids: Vec<_> = bank.questions().iter().map(|q| q.question_id.as_str()).collect();
    assert_eq!(ids, ["Q1", "Q2", "Q3"]);
    assert_eq!(bank.first().unwrap().question_id, "Q1");
  }

  #[test]
  fn dependent_question_follows_its_condition() {
    let bank = QuestionBank::new(
      vec![
        question("Q1", 1, None),
        question("Q2", 2, Some("Q1=3")),
        question("Q3", 3, None),
      ],
      vec![],
    );

    let mut answers = CaseAnswers::new();
    text(&mut answers, "Q1", "3");
    let next = bank.next_question(Some("Q1"), &answers, Comparison::Verbatim);
    assert_eq!(next.unwrap().question_id, "Q2");

    let mut answers = CaseAnswers::new();
    text(&mut answers, "Q1", "4");
    let next = bank.next_question(Some("Q1"), &answers, Comparison::Verbatim);
    assert_eq!(next.unwrap().question_id, "Q3");

    assert!(bank.next_question(Some("Q3"), &answers, Comparison::Verbatim).is_none());
    assert!(bank.next_question(Some("nope"), &answers, Comparison::Verbatim).is_none());
  }

  #[test]
  fn unparsable_dependency_hides_question() {
    let bank = QuestionBank::new(vec![question("Q1", 1, Some("Q0 ! 1"))], vec![]);
    assert!(bank.next_question(None, &CaseAnswers::new(), Comparison::Verbatim).is_none());
  }

  #[test]
  fn cascading_choices_follow_parent_answer() {
    let mut district = question("DISTRICT", 2, None);
    district.response_type = ResponseType::SingleChoiceLarge;
    district.cascade_from = Some("REGION".into());
    let bank = QuestionBank::new(
      vec![question("REGION", 1, None), district],
      vec![
        choice("DISTRICT", "d1", Some("north")),
        choice("DISTRICT", "d2", Some("south")),
        choice("DISTRICT", "other", None),
      ],
    );

    let mut answers = CaseAnswers::new();
    let options = |a: &CaseAnswers| -> Vec<String> {
      bank
        .eligible_choices("DISTRICT", a, Comparison::Verbatim)
        .into_iter()
        .map(|c| c.option_id.clone())
        .collect()
    };
    assert_eq!(options(&answers), ["other"]);

    text(&mut answers, "REGION", "north");
    assert_eq!(options(&answers), ["d1", "other"]);

    answers.insert("REGION", AnswerValue::MultiChoice(vec!["north".into(), "south".into()]));
    assert_eq!(options(&answers), ["d1", "d2", "other"]);
  }

  #[test]
  fn choice_dependency_gates_single_option() {
    let mut gated = choice("Q2", "b", None);
    gated.depends = Some("Q1=3".into());
    let bank = QuestionBank::new(
      vec![question("Q1", 1, None), question("Q2", 2, None)],
      vec![choice("Q2", "a", None), gated],
    );

    let mut answers = CaseAnswers::new();
    text(&mut answers, "Q1", "3");
    assert_eq!(bank.eligible_choices("Q2", &answers, Comparison::Verbatim).len(), 2);

    text(&mut answers, "Q1", "4");
    assert_eq!(bank.eligible_choices("Q2", &answers, Comparison::Verbatim).len(), 1);
  }
}
