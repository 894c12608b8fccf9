use std::fmt;

use crate::StoreError;

/// Conjunction of column-equality clauses between the `source` (incoming)
/// and `target` (existing) aliases. Each clause compares one column with
/// itself across the two sides; the key tuple over all clauses decides
/// row identity for merge purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePredicate {
    keys: Vec<String>,
}

impl MergePredicate {
    #[must_use]
    pub fn key(name: &str) -> Self {
        Self {
            keys: vec![name.to_owned()],
        }
    }

    #[must_use]
    pub fn keys(names: &[&str]) -> Self {
        Self {
            keys: names.iter().map(|name| (*name).to_owned()).collect(),
        }
    }

    #[must_use]
    pub fn key_names(&self) -> &[String] {
        &self.keys
    }

    /// Parse the textual form `"target.K = source.K [AND ...]"`. The two
    /// aliases may appear on either side of each `=`, but a clause must
    /// name the same column on both sides.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let malformed = |detail: &str| StoreError::MalformedPredicate {
            input: input.to_owned(),
            detail: detail.to_owned(),
        };

        let spaced = input.replace('=', " = ");
        let tokens: Vec<&str> = spaced.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(malformed("empty predicate"));
        }

        let mut keys = Vec::new();
        let mut idx = 0;
        loop {
            if idx + 3 > tokens.len() {
                return Err(malformed("expected `<alias>.<column> = <alias>.<column>`"));
            }
            let (left_alias, left_column) = parse_term(tokens[idx]).ok_or_else(|| {
                malformed("each term must be source.<column> or target.<column>")
            })?;
            if tokens[idx + 1] != "=" {
                return Err(malformed("clauses must use `=`"));
            }
            let (right_alias, right_column) = parse_term(tokens[idx + 2]).ok_or_else(|| {
                malformed("each term must be source.<column> or target.<column>")
            })?;

            if left_alias == right_alias {
                return Err(malformed("a clause must pair the source and target aliases"));
            }
            if left_column != right_column {
                return Err(malformed(
                    "a clause must compare the same column on both sides",
                ));
            }
            keys.push(left_column.to_owned());
            idx += 3;

            if idx == tokens.len() {
                break;
            }
            if !tokens[idx].eq_ignore_ascii_case("and") {
                return Err(malformed("clauses must be joined with AND"));
            }
            idx += 1;
        }

        Ok(Self { keys })
    }
}

fn parse_term(term: &str) -> Option<(&'static str, &str)> {
    let (alias, column) = term.split_once('.')?;
    if column.is_empty() {
        return None;
    }
    if alias.eq_ignore_ascii_case("source") {
        Some(("source", column))
    } else if alias.eq_ignore_ascii_case("target") {
        Some(("target", column))
    } else {
        None
    }
}

impl fmt::Display for MergePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .keys
            .iter()
            .map(|key| format!("target.{key} = source.{key}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        write!(f, "{rendered}")
    }
}

#[cfg(test)]
mod tests {
    use super::MergePredicate;
    use crate::StoreError;

    #[test]
    fn textual_form_round_trips() {
        let parsed =
            MergePredicate::parse("target.StopID = source.StopID AND target.Routes = source.Routes")
                .expect("parses");
        assert_eq!(parsed, MergePredicate::keys(&["StopID", "Routes"]));
        assert_eq!(
            parsed.to_string(),
            "target.StopID = source.StopID AND target.Routes = source.Routes"
        );
    }

    #[test]
    fn aliases_may_swap_sides() {
        let parsed = MergePredicate::parse("source.StopID = target.StopID").expect("parses");
        assert_eq!(parsed, MergePredicate::key("StopID"));
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let err = MergePredicate::parse("target.StopID = source.Routes").expect_err("mismatch");
        assert!(matches!(err, StoreError::MalformedPredicate { .. }));
    }

    #[test]
    fn same_alias_on_both_sides_is_rejected() {
        let err = MergePredicate::parse("source.StopID = source.StopID").expect_err("same alias");
        assert!(matches!(err, StoreError::MalformedPredicate { .. }));
    }
}
