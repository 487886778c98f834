//! The organization/program replication filter.
//!
//! The remote store evaluates the JavaScript source in [`FilterDesign`]
//! server-side; local stores evaluate [`FilterParams::matches`], which must
//! agree with it.

use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Design document that hosts the filter.
pub const DESIGN_NAME: &str = "surveyor";

/// Filter function name inside the design document.
pub const ORG_PROGRAM_FILTER: &str = "by_org_program";

/// JavaScript predicate registered on every remote collection.
pub const ORG_PROGRAM_SOURCE: &str = "function (doc, req) {
  var org = req.query.Organization;
  if (!org) { return true; }
  if (doc.Organization !== org) { return false; }
  var program = req.query.Program;
  return !program || doc.Program === program;
}";

/// Query parameters handed to the filter. Serialises with the wire names the
/// filter reads from `req.query`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
  #[serde(rename = "Organization", skip_serializing_if = "Option::is_none")]
  pub organization: Option<String>,
  #[serde(rename = "Program", skip_serializing_if = "Option::is_none")]
  pub program:      Option<String>,
}

impl FilterParams {
  /// Parameters for an organization and optional program. Empty strings
  /// count as "not requested".
  pub fn new(organization: &str, program: Option<&str>) -> Self {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
    Self {
      organization: non_empty(organization),
      program:      program.and_then(non_empty),
    }
  }

  /// `(name, value)` pairs for a URL query string.
  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(org) = &self.organization {
      pairs.push(("Organization", org.clone()));
    }
    if let Some(program) = &self.program {
      pairs.push(("Program", program.clone()));
    }
    pairs
  }

  /// Rust rendition of [`ORG_PROGRAM_SOURCE`].
  pub fn matches(&self, doc: &Document) -> bool {
    let Some(org) = &self.organization else {
      return true;
    };
    if doc.str_field("Organization") != Some(org.as_str()) {
      return false;
    }
    match &self.program {
      None => true,
      Some(program) => doc.str_field("Program") == Some(program.as_str()),
    }
  }
}

/// A named filter plus the parameters to evaluate it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
  /// Qualified name, `"<design>/<filter>"`.
  pub name:   String,
  pub params: FilterParams,
}

impl FilterSpec {
  pub fn org_program(params: FilterParams) -> Self {
    Self { name: FilterDesign::org_program().qualified_name(), params }
  }
}

/// A filter function to provision on a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDesign {
  pub design: String,
  pub name:   String,
  pub source: String,
}

impl FilterDesign {
  pub fn org_program() -> Self {
    Self {
      design: DESIGN_NAME.to_owned(),
      name:   ORG_PROGRAM_FILTER.to_owned(),
      source: ORG_PROGRAM_SOURCE.to_owned(),
    }
  }

  pub fn qualified_name(&self) -> String { format!("{}/{}", self.design, self.name) }

  /// Id of the hosting design document.
  pub fn document_id(&self) -> String { format!("_design/{}", self.design) }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn doc(org: Option<&str>, program: Option<&str>) -> Document {
    let mut d = Document::new("d");
    if let Some(org) = org {
      d.fields.insert("Organization".into(), json!(org));
    }
    if let Some(program) = program {
      d.fields.insert("Program".into(), json!(program));
    }
    d
  }

  #[test]
  fn no_organization_matches_everything() {
    let params = FilterParams::default();
    assert!(params.matches(&doc(None, None)));
    assert!(params.matches(&doc(Some("Other"), Some("X"))));
  }

  #[test]
  fn organization_must_match() {
    let params = FilterParams::new("Mercy", None);
    assert!(params.matches(&doc(Some("Mercy"), Some("PT"))));
    assert!(params.matches(&doc(Some("Mercy"), None)));
    assert!(!params.matches(&doc(Some("Hope"), Some("PT"))));
    assert!(!params.matches(&doc(None, None)));
  }

  #[test]
  fn program_narrows_when_requested() {
    let params = FilterParams::new("Mercy", Some("PT"));
    assert!(params.matches(&doc(Some("Mercy"), Some("PT"))));
    assert!(!params.matches(&doc(Some("Mercy"), Some("OT"))));
    assert!(!params.matches(&doc(Some("Mercy"), None)));
  }

  #[test]
  fn empty_strings_are_not_requests() {
    let params = FilterParams::new("", Some(""));
    assert_eq!(params, FilterParams::default());
    assert!(params.query_pairs().is_empty());
  }

  #[test]
  fn query_pairs_use_wire_names() {
    let params = FilterParams::new("Mercy", Some("PT"));
    assert_eq!(
      params.query_pairs(),
      vec![("Organization", "Mercy".to_string()), ("Program", "PT".to_string())]
    );
    assert_eq!(
      FilterSpec::org_program(params).name,
      "surveyor/by_org_program"
    );
  }
}
