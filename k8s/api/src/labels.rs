use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// The labels of a resource, as stored in its metadata.
pub type Labels = Map;

/// A compiled label selector: the result of `match_labels` and
/// `match_expressions` are ANDed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Vec<Expression>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Expression {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

// === impl Selector ===

impl Selector {
    /// Compiles a `metav1.LabelSelector`; fails on an operator outside the
    /// API's closed set or on a malformed values list.
    pub fn from_label_selector(selector: &LabelSelector) -> Result<Self, InvalidSelector> {
        let match_labels = selector.match_labels.clone().unwrap_or_default();

        let match_expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(Expression::from_requirement)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            match_labels,
            match_expressions,
        })
    }

    pub fn matches(&self, labels: &Map) -> bool {
        for (k, v) in &self.match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }

        self.match_expressions.iter().all(|expr| expr.matches(labels))
    }

    /// Indicates whether this selector matches every resource.
    pub fn selects_all(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self {
            match_labels: iter
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: vec![],
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidSelector(String);

impl std::fmt::Display for InvalidSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid label selector: {}", self.0)
    }
}

impl std::error::Error for InvalidSelector {}

// === impl Expression ===

impl Expression {
    fn from_requirement(req: &LabelSelectorRequirement) -> Result<Self, InvalidSelector> {
        let operator = match req.operator.as_str() {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            op => return Err(InvalidSelector(format!("unknown operator {op}"))),
        };

        let values = req.values.clone().unwrap_or_default();
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(InvalidSelector(format!(
                    "operator {} requires values",
                    req.operator
                )));
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(InvalidSelector(format!(
                    "operator {} forbids values",
                    req.operator
                )));
            }
            _ => {}
        }

        Ok(Self {
            key: req.key.clone(),
            operator,
            values,
        })
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => match labels.get(&self.key) {
                Some(v) => self.values.contains(v),
                None => false,
            },
            Operator::NotIn => match labels.get(&self.key) {
                Some(v) => !self.values.contains(v),
                None => true,
            },
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}
