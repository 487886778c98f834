//! Dependency expressions that gate questions and choices on earlier answers.
//!
//! Grammar: one or more clauses `QUESTION_ID OP LITERAL` joined by `AND` (or
//! `&&`). Operators are `=` (also `==`), `!=`, `>`, `>=`, `<`, `<=`. Both
//! operands are trimmed and quote characters are stripped from the literal.
//!
//! Comparison never coerces implicitly. [`Comparison::Verbatim`] compares the
//! answer text and the literal as strings, so `"10" > "9"` is false;
//! [`Comparison::NumericAware`] compares numerically when both sides parse as
//! numbers. Callers pick the mode explicitly.

use std::{cmp::Ordering, collections::HashMap, fmt, str::FromStr};

use crate::{
  Error, Result,
  response::{AnswerValue, Response},
};

/// How clause operands are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Comparison {
  /// Plain string comparison of the answer text and the literal.
  #[default]
  Verbatim,
  /// Numeric comparison when both sides parse as `f64`, string otherwise.
  NumericAware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
  Eq,
  Ne,
  Gt,
  Ge,
  Lt,
  Le,
}

impl Operator {
  fn holds(self, ordering: Ordering) -> bool {
    match self {
      Self::Eq => ordering == Ordering::Equal,
      Self::Ne => ordering != Ordering::Equal,
      Self::Gt => ordering == Ordering::Greater,
      Self::Ge => ordering != Ordering::Less,
      Self::Lt => ordering == Ordering::Less,
      Self::Le => ordering != Ordering::Greater,
    }
  }

  fn symbol(self) -> &'static str {
    match self {
      Self::Eq => "=",
      Self::Ne => "!=",
      Self::Gt => ">",
      Self::Ge => ">=",
      Self::Lt => "<",
      Self::Le => "<=",
    }
  }
}

/// `question_id op literal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
  pub question_id: String,
  pub op:          Operator,
  pub literal:     String,
}

impl Clause {
  /// Evaluate against the case's answers. An unanswered question, or an
  /// answer without comparable text, fails the clause whatever the operator.
  pub fn holds(&self, answers: &CaseAnswers, mode: Comparison) -> bool {
    let Some(text) = answers
      .get(&self.question_id)
      .and_then(AnswerValue::comparable_text)
    else {
      return false;
    };
    let lhs = text.trim();
    let rhs = self.literal.as_str();

    let ordering = match mode {
      Comparison::Verbatim => lhs.cmp(rhs),
      Comparison::NumericAware => match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        (Ok(a), Ok(b)) => match a.partial_cmp(&b) {
          Some(o) => o,
          None => return false,
        },
        _ => lhs.cmp(rhs),
      },
    };
    self.op.holds(ordering)
  }
}

/// A parsed dependency expression; all clauses must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyExpr {
  pub clauses: Vec<Clause>,
}

impl DependencyExpr {
  pub fn parse(expr: &str) -> Result<Self> { expr.parse() }

  pub fn holds(&self, answers: &CaseAnswers, mode: Comparison) -> bool {
    self.clauses.iter().all(|c| c.holds(answers, mode))
  }

  /// Question ids this expression reads.
  pub fn referenced(&self) -> impl Iterator<Item = &str> {
    self.clauses.iter().map(|c| c.question_id.as_str())
  }
}

impl FromStr for DependencyExpr {
  type Err = Error;

  fn from_str(expr: &str) -> Result<Self> {
    let invalid = |reason: &str| Error::InvalidExpression {
      expr:   expr.to_owned(),
      reason: reason.to_owned(),
    };

    let clauses = split_conjunction(expr)
      .into_iter()
      .map(|part| parse_clause(part).map_err(|reason| invalid(&reason)))
      .collect::<Result<Vec<_>>>()?;

    if clauses.is_empty() {
      return Err(invalid("empty expression"));
    }
    Ok(Self { clauses })
  }
}

impl fmt::Display for DependencyExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, c) in self.clauses.iter().enumerate() {
      if i > 0 {
        f.write_str(" AND ")?;
      }
      write!(f, "{}{}{}", c.question_id, c.op.symbol(), c.literal)?;
    }
    Ok(())
  }
}

/// Split on `&&` and on the word `AND` (any case) surrounded by whitespace.
fn split_conjunction(expr: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  for chunk in expr.split("&&") {
    let mut rest = chunk;
    loop {
      let lower = rest.to_ascii_lowercase();
      match find_and_keyword(&lower) {
        Some((start, end)) => {
          parts.push(&rest[..start]);
          rest = &rest[end..];
        }
        None => {
          parts.push(rest);
          break;
        }
      }
    }
  }
  parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Byte range of the first whitespace-delimited `and` in `lower`.
fn find_and_keyword(lower: &str) -> Option<(usize, usize)> {
  let bytes = lower.as_bytes();
  let mut from = 0;
  while let Some(pos) = lower[from..].find("and") {
    let start = from + pos;
    let end = start + 3;
    let before = start > 0 && bytes[start - 1].is_ascii_whitespace();
    let after = end < bytes.len() && bytes[end].is_ascii_whitespace();
    if before && after {
      return Some((start, end));
    }
    from = end;
  }
  None
}

fn parse_clause(part: &str) -> std::result::Result<Clause, String> {
  let pos = part
    .find(['=', '!', '<', '>'])
    .ok_or_else(|| format!("no operator in clause {:?}", part.trim()))?;
  let rest = &part[pos..];

  let (op, len) = if rest.starts_with("==") {
    (Operator::Eq, 2)
  } else if rest.starts_with("!=") {
    (Operator::Ne, 2)
  } else if rest.starts_with(">=") {
    (Operator::Ge, 2)
  } else if rest.starts_with("<=") {
    (Operator::Le, 2)
  } else if rest.starts_with('=') {
    (Operator::Eq, 1)
  } else if rest.starts_with('>') {
    (Operator::Gt, 1)
  } else if rest.starts_with('<') {
    (Operator::Lt, 1)
  } else {
    return Err(format!("dangling '!' in clause {:?}", part.trim()));
  };

  let question_id = part[..pos].trim();
  if question_id.is_empty() {
    return Err(format!("missing question id in clause {:?}", part.trim()));
  }
  let literal = part[pos + len..]
    .trim()
    .trim_matches(|c: char| c == '"' || c == '\'')
    .trim();

  Ok(Clause {
    question_id: question_id.to_owned(),
    op,
    literal: literal.to_owned(),
  })
}

// ─── Answers ─────────────────────────────────────────────────────────────────

/// The answers collected so far for one case, keyed by question id.
#[derive(Debug, Clone, Default)]
pub struct CaseAnswers {
  answers: HashMap<String, AnswerValue>,
}

impl CaseAnswers {
  pub fn new() -> Self { Self::default() }

  pub fn from_responses<'a>(responses: impl IntoIterator<Item = &'a Response>) -> Self {
    let answers = responses
      .into_iter()
      .map(|r| (r.question_id.clone(), r.answer.clone()))
      .collect();
    Self { answers }
  }

  pub fn insert(&mut self, question_id: impl Into<String>, value: AnswerValue) {
    self.answers.insert(question_id.into(), value);
  }

  pub fn get(&self, question_id: &str) -> Option<&AnswerValue> { self.answers.get(question_id) }

  pub fn len(&self) -> usize { self.answers.len() }

  pub fn is_empty(&self) -> bool { self.answers.is_empty() }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn answers(pairs: &[(&str, &str)]) -> CaseAnswers {
    let mut a = CaseAnswers::new();
    for (q, v) in pairs {
      a.insert(*q, AnswerValue::Text((*v).to_owned()));
    }
    a
  }

  fn holds(expr: &str, a: &CaseAnswers, mode: Comparison) -> bool {
    DependencyExpr::parse(expr).unwrap().holds(a, mode)
  }

  #[test]
  fn equality_includes_and_excludes() {
    let a = answers(&[("Q1", "3")]);
    assert!(holds("Q1=3", &a, Comparison::Verbatim));
    assert!(!holds("Q1=4", &a, Comparison::Verbatim));
    assert!(holds("Q1==3", &a, Comparison::Verbatim));
    assert!(holds("Q1!=4", &a, Comparison::Verbatim));
  }

  #[test]
  fn operands_are_trimmed_and_unquoted() {
    let a = answers(&[("Q1", " yes ")]);
    assert!(holds("  Q1 = 'yes' ", &a, Comparison::Verbatim));
    assert!(holds("Q1=\"yes\"", &a, Comparison::Verbatim));
  }

  #[test]
  fn clauses_join_with_and() {
    let a = answers(&[("Q1", "3"), ("Q2", "no")]);
    assert!(holds("Q1=3 AND Q2=no", &a, Comparison::Verbatim));
    assert!(holds("Q1=3 and Q2=no", &a, Comparison::Verbatim));
    assert!(holds("Q1=3 && Q2=no", &a, Comparison::Verbatim));
    assert!(!holds("Q1=3 AND Q2=yes", &a, Comparison::Verbatim));
  }

  #[test]
  fn and_inside_identifiers_is_not_a_separator() {
    let expr = DependencyExpr::parse("BRAND=band").unwrap();
    assert_eq!(expr.clauses.len(), 1);
    assert_eq!(expr.clauses[0].question_id, "BRAND");
    assert_eq!(expr.clauses[0].literal, "band");
  }

  #[test]
  fn unanswered_question_fails_every_operator() {
    let a = CaseAnswers::new();
    for expr in ["Q1=3", "Q1!=3", "Q1>3", "Q1<=3"] {
      assert!(!holds(expr, &a, Comparison::Verbatim), "{expr}");
    }
  }

  // Verbatim mode keeps the string semantics of the original comparisons.
  // These cases pin down where that diverges from numeric intent.
  #[test]
  fn verbatim_ordering_is_lexical() {
    let a = answers(&[("AGE", "10")]);
    assert!(!holds("AGE>9", &a, Comparison::Verbatim));
    assert!(holds("AGE<9", &a, Comparison::Verbatim));
    assert!(holds("AGE>=10", &a, Comparison::Verbatim));
    assert!(!holds("AGE=10.0", &a, Comparison::Verbatim));
  }

  #[test]
  fn numeric_aware_ordering_is_numeric() {
    let a = answers(&[("AGE", "10")]);
    assert!(holds("AGE>9", &a, Comparison::NumericAware));
    assert!(!holds("AGE<9", &a, Comparison::NumericAware));
    assert!(holds("AGE=10.0", &a, Comparison::NumericAware));
    assert!(holds("AGE<=10", &a, Comparison::NumericAware));
  }

  #[test]
  fn numeric_aware_falls_back_to_strings() {
    let a = answers(&[("Q1", "abc")]);
    assert!(holds("Q1>abb", &a, Comparison::NumericAware));
    // "abc" is not a number, so the comparison with 5 is lexical.
    assert!(holds("Q1>5", &a, Comparison::NumericAware));
  }

  #[test]
  fn multi_choice_compares_joined_text() {
    let mut a = CaseAnswers::new();
    a.insert("Q1", AnswerValue::MultiChoice(vec!["3".into()]));
    a.insert("Q2", AnswerValue::MultiChoice(vec!["3".into(), "4".into()]));
    assert!(holds("Q1=3", &a, Comparison::Verbatim));
    assert!(!holds("Q2=3", &a, Comparison::Verbatim));
    assert!(holds("Q2=3,4", &a, Comparison::Verbatim));
  }

  #[test]
  fn rejects_malformed_expressions() {
    for bad in ["", "Q1", "=3", "Q1 ! 3"] {
      assert!(DependencyExpr::parse(bad).is_err(), "{bad:?} should not parse");
    }
  }

  #[test]
  fn tolerates_trailing_separator() {
    let expr = DependencyExpr::parse("Q1=3 AND ").unwrap();
    assert_eq!(expr.clauses.len(), 1);
  }

  #[test]
  fn display_normalises() {
    let expr = DependencyExpr::parse(" Q1 = 3 and Q2 >= '5' ").unwrap();
    assert_eq!(expr.to_string(), "Q1=3 AND Q2>=5");
    assert_eq!(expr.referenced().collect::<Vec<_>>(), vec!["Q1", "Q2"]);
  }
}
